#[test]
fn data_tests() {
    trydata::SuiteCases::new()
        .checker_path(env!("CARGO_BIN_EXE_checker-fixture"))
        .case("tests/data/*.test")
        .xfail("tests/data/xfail-stale.test");
}
