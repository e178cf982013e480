mod cli_tests;
mod pipeline_tests;
mod session_tests;
