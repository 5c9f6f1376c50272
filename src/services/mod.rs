pub mod finnhub;
pub mod db_init;

pub mod alerts_service;
pub mod cooldown;
pub mod evaluator;
pub mod fanout;
pub mod notifier;
pub mod price_cache;
pub mod quote_poller;
