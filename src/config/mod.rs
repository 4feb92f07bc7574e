// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration: the link argument model and its persistence.

pub mod link;
pub mod persistence;
pub mod saved;

pub use link::{LinkConfig, Role};
pub use persistence::{ConfigError, ConfigStore};
pub use saved::SavedConfig;
