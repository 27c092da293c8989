//! Exchange access: the client contract and the live Bittrex implementation.

mod bittrex;
mod exchange;
mod types;

pub use bittrex::{BittrexClient, Credentials};
pub use exchange::{ExchangeApi, Order, OrderSide, Ticker};
pub use types::*;
