mod report;
mod service;

pub use report::ReportService;
pub use service::TimeTrackingService;
