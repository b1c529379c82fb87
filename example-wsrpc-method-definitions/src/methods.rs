mod eth_accounts;
mod eth_block_number;
mod eth_get_balance;
mod web3_client_version;

pub use eth_accounts::EthAccounts;
pub use eth_block_number::EthBlockNumber;
pub use eth_get_balance::EthGetBalance;
pub use web3_client_version::Web3ClientVersion;
