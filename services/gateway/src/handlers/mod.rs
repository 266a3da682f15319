pub mod orderbook;
pub mod status;
pub mod ws;
