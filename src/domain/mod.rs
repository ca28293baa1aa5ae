// Plan capture requests and results
pub mod capture;

// Injectable wall clock
pub mod clock;

// Command channel parser
pub mod command;

// Domain-specific error types
pub mod errors;

// Port interfaces
pub mod ports;

// Report cycle timings
pub mod report;
