mod column_family_tests;
mod cursor_tests;
mod engine_tests;
