//! Jubilee - points wallet and celebration engine for family rewards
//!
//! "Proclaim liberty throughout the land" - Leviticus 25:10
//!
//! Jubilee keeps one beneficiary's points economy live on screen: it
//! reconciles the wallet view from a sometimes-unreliable aggregate
//! source, follows row changes over a push channel, and turns good
//! news into a deduplicated celebration queue with audio and confetti.
//!
//! ## Components
//!
//! - **Ledger**: read interface over the backing transaction store
//! - **Wallet**: four-number view derivation with degraded fallback
//! - **Stream**: change event types and the per-table multiplexer
//! - **Notify**: celebration/informational classification with cooldown
//! - **Celebration**: queue, overlay state machine, audio gating
//! - **Session**: one task per beneficiary tying it all together

pub mod celebration;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod session;
pub mod stream;
pub mod types;
pub mod wallet;

pub use identity::{BeneficiaryKeys, IdentityResolver};
pub use session::{BeneficiarySession, SessionConfig, SessionContext, SessionHandle};
pub use types::{JubileeError, Result};
pub use wallet::{WalletSource, WalletView};
