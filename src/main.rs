fn main() -> anyhow::Result<()> {
    touchmap::logging::init();
    touchmap::cli::run()
}
