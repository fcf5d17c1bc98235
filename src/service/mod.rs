pub mod accounts;
pub mod import;
pub mod keyring;
pub mod multisig;
pub mod registry;
pub mod retry;
pub mod stash;

pub use accounts::{AccountFilter, AccountService, AccountSort, DisplayAccount};
pub use import::ImportService;
pub use keyring::{Keyring, KeyringOp, KeyringReply};
pub use multisig::MultisigCoordinator;
pub use registry::{CommitOutcome, KeyringRegistry, KeyringTarget};
pub use retry::{RetryConfig, RetryController};
pub use stash::ImportStash;
