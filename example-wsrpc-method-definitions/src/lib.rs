pub mod formatters;
mod methods;

pub use methods::{EthAccounts, EthBlockNumber, EthGetBalance, Web3ClientVersion};
