//! `th-config-store`: persisted per-instance configuration.
//!
//! Records are keyed by server name plus a [`Qualifier`] (a port or an
//! alias), stored one JSON file per record, and written atomically. Writers
//! can subscribe to changes of a record with [`ConfigStore::on_change`].

pub mod dir;
pub mod error;
pub mod naming;
pub mod store;

pub use dir::resolve_config_dir;
pub use error::ConfigStoreError;
pub use naming::Qualifier;
pub use store::{
    CallbackError, ConfigMap, ConfigStore, InstanceConfig, Listing, SubscriptionId,
};
