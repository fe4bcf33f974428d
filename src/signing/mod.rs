pub mod agent;
pub mod wallet;

pub use agent::{action_hash, sign_l1_action, ExchangeDomain, PhantomAgent, WireSignature};
pub use wallet::Wallet;
