fn main() {
    let env = env_logger::Env::default()
        .filter_or("CALLGUARD_LOG", "info")
        .write_style_or("CALLGUARD_LOG_STYLE", "auto");

    env_logger::init_from_env(env);

    if let Err(err) = app::run() {
        log::error!("app error: {err}");
        std::process::exit(1);
    }
}
