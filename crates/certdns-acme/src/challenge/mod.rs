pub mod cleaner;
pub mod propagation;
pub mod publisher;
pub mod zone;

pub use cleaner::{CleanupReport, DnsChallengeCleaner};
pub use propagation::PropagationCheck;
pub use publisher::{DnsChallengePublisher, DnsChallengeRecord};
pub use zone::{key_authorization_digest, resolve_challenge_host, ChallengeHost, ACME_CHALLENGE_LABEL};
