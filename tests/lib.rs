/// Main test module that includes all sub-modules
/// Run specific tests with `cargo test <module>::<submodule>`
/// For example: `cargo test integration::end_to_end_test`
// Utility modules
pub mod utils;

// Integration tests
pub mod integration {
    pub mod end_to_end_test;
    pub mod generation_test;
    pub mod output_test;
    pub mod parsing_test;
    pub mod resources_test;
}
