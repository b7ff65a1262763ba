/// Data layer: record model, construction, queries and persistence.
///
/// Architecture:
/// ```text
///  simulator tensors        .csv / .json / .parquet tables
///        │                              │
///        ▼                              ▼
///   ┌────────────┐               ┌──────────┐
///   │ simulation │               │  loader   │  schema check → Vec<SignalRecord>
///   └────────────┘               └──────────┘
///        │                              │
///        └──────────────┬───────────────┘
///                       ▼
///              ┌────────────────┐
///              │ SignalDatabase │  columnar store, L2-normalized curves
///              └────────────────┘
///               │       │       │
///               ▼       ▼       ▼
///          ┌───────┐ ┌──────┐ ┌──────┐
///          │ index │ │filter│ │store │  unique values / range selection / save+load
///          └───────┘ └──────┘ └──────┘
/// ```

pub mod filter;
pub mod index;
pub mod loader;
pub mod model;
pub mod simulation;
pub mod store;
