//! # Tier & Identity Model
//!
//! **Subsystem ID:** 1
//!
//! Static rules for classifying vx0 nodes and allocating their numeric
//! identifiers. Holds no network state.
//!
//! ## Tiers
//!
//! | Tier | Identifier range | Max peers |
//! |------|------------------|-----------|
//! | Backbone | 65000..=65099 | 50 |
//! | Regional | 65100..=65999 | 20 |
//! | Edge | 66000..=69999 | 5 |
//!
//! ## Legal adjacencies
//!
//! ```text
//!             Backbone  Regional  Edge
//! Backbone       ✓         ✓       ✗
//! Regional       ✓         ✓       ✓
//! Edge           ✗         ✓       ✗
//! ```
//!
//! ## Example
//!
//! ```rust
//! use vx_01_tier_identity::{is_adjacency_legal, IdentifierAllocator, Tier};
//!
//! let mut allocator = IdentifierAllocator::new();
//! let id = allocator.allocate(Tier::Edge, None).unwrap();
//! assert_eq!(id.tier(), Some(Tier::Edge));
//!
//! assert!(is_adjacency_legal(Tier::Edge, Tier::Regional));
//! assert!(!is_adjacency_legal(Tier::Edge, Tier::Edge));
//! ```

pub mod domain;
pub mod error;

pub use domain::{is_adjacency_legal, IdentifierAllocator, NodeId, NodeIdentity, Tier};
pub use error::{IdentityError, IdentityResult};
