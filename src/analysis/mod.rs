/// Fire danger analysis pipeline.
///
/// Submodules:
/// - `reconcile` - picks one canonical record per station-day.
/// - `trend`     - deadband trend classifier shared by stations and zones.
/// - `station`   - per-station state machine from fetch to assembled result.
/// - `zones`     - average-then-classify zone summaries.

pub mod reconcile;
pub mod station;
pub mod trend;
pub mod zones;
