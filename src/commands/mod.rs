pub mod cli_commands;
pub mod organize_pipeline;
pub mod review_commands;
