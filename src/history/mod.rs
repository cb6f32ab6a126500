//! commit history: graph nodes, relative addressing, graph search
//!
//! ```text
//!   State ◀──previous── State ◀──previous── State (head)
//!     ▲                                          │
//!     └──────────── valid_path_previous ─────────┘
//! ```
//!
//! States live in the blob area and refer to each other by hash only.
//! [`HistoryCrawler`] walks them; [`Path`] and [`Step`] describe walks
//! without naming any hash.

mod crawler;
mod path;
mod state;

pub use crawler::{Blacklist, HistoryCrawler};
pub use path::{Path, Step};
pub use state::State;
