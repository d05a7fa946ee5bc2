/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::table::{index, AnyIndex, IndexSpec, Object, ObjectId};
use crate::types::basic::{AssetSymbol, Price};

/// The median of the exchange rates published by the scheduled witnesses for one quote asset, recomputed
/// every feed interval, and the rolling window of past medians.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeedHistory {
    pub(crate) id: ObjectId,
    pub symbol: AssetSymbol,
    pub current_median_history: Price,
    pub price_history: Vec<Price>,
}

impl Object for FeedHistory {
    const TABLE: u16 = 13;
    const TABLE_NAME: &'static str = "feed_history";

    fn id(&self) -> ObjectId {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = id
    }

    fn indexes() -> Vec<Box<dyn AnyIndex<Self>>> {
        vec![index::<FeedHistory, FeedBySymbol>()]
    }
}

pub struct FeedBySymbol;

impl IndexSpec<FeedHistory> for FeedBySymbol {
    type Key = AssetSymbol;
    const UNIQUE: bool = true;

    fn key(feed: &FeedHistory) -> AssetSymbol {
        feed.symbol
    }
}
