/// Interfaces Layer - External Entry Points
///
/// ## Modules
/// - `cli`: command-line interface (main.rs logic)

pub mod cli;
