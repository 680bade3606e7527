pub mod clock;
pub mod password;
pub mod token;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use password::{Argon2Hasher, CredentialHasher, HashingParams, Password, PasswordHashString};
pub use token::{generate_token, hash_token};
pub use validation::ValidatedJson;
