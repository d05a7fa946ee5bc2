#![allow(dead_code)]

pub(crate) mod evaluators;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod test_chain;
