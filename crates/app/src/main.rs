fn main() {
    if let Err(error) = superimage::run_from_env() {
        tracing::error!("{error:#}");
        std::process::exit(1);
    }
}
