// Cross-module test suites
pub mod test_edge_cases;
