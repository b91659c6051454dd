//! Testing utilities for the ceremony engine
//!
//! Available to unit tests and, through the `testing` feature, to the
//! integration tests under `tests/`.
//!
//! ## Organization
//!
//! - [`fixtures`] - Ready-made settings, policies, engines and credentials
//! - [`authenticator`] - A software authenticator producing real signatures
//! - [`clock`] - A clock that only moves when told to
//!
//! ## Usage
//!
//! ```rust,ignore
//! use passkey_ceremony::testing::{fixtures, SoftAuthenticator};
//!
//! let bed = fixtures::test_bed();
//! let alice = fixtures::user("alice");
//! let mut authenticator = SoftAuthenticator::es256(fixtures::RP_ID, fixtures::ORIGIN);
//!
//! fixtures::register(&bed.engine, &alice, &mut authenticator).unwrap();
//! fixtures::authenticate(&bed.engine, &alice, &mut authenticator).unwrap();
//! ```

pub mod authenticator;
pub mod clock;
pub mod fixtures;

pub use authenticator::SoftAuthenticator;
pub use clock::ManualClock;
pub use fixtures::TestBed;
