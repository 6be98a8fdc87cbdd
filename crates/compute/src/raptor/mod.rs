//! Scheduled-transit journey planning: route snapshots, copy-on-write
//! request views, the round-based scan and journey selection.

pub mod data;
pub mod journey;
pub mod scan;

pub use data::{RaptorRoute, RaptorStop, RouteDataView, SharedRouteData, Transfer};
pub use journey::{Journey, JourneySelection, JourneyStep, RunSettings, RunSettingsOverride};
pub use scan::scan;
