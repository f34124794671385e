// Integration tests for the sync engine, scheduler and HTTP transport
// One test target; shared fixtures live in `support`


mod engine_tests;
mod http_tests;
