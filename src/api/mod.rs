pub mod coingecko;
pub mod explorer;
