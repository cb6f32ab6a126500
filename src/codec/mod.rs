//! descriptor encoding for Hydra entities
//!
//! ```text
//!   Entity ──describe()──▶ descriptor text ──digest──▶ Fingerprint
//!      ▲                         │
//!      └────────parse()──────────┘
//! ```
//!
//! [`descriptor`] is the line format itself; [`entity`] holds one
//! serializer per stored entity type.

pub mod descriptor;
pub mod entity;

pub use descriptor::{Descriptor, DescriptorWriter, Header, Record, Token};
pub use entity::{inspect, ChildRecord, ContainerRecord, Entity, StageRecord, UnitRecord};
