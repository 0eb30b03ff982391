pub mod extract_service;
pub mod inference_service;
pub mod move_service;
pub mod plan_service;
pub mod spreadsheet_service;
pub mod summarize_service;
