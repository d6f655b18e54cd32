//! # Formats Module
//!
//! Model bundle artifacts and their on-disk encodings.
//!
//! This module contains:
//! - The `ModelBundle` schema (models, encoder categories, class labels)
//! - JSON encoding (human-editable, what training exports write)
//! - Binary encoding (postcard + checksummed header)
//!
//! Note: File I/O operations remain in the app layer (apps/loanlens).
//! This module only handles format conversion (pure transformations).

mod bundle;

pub use bundle::*;
