use chrono::Local;
use env_logger::{Builder, Env};
use std::io::Write;

/// Installs the process-wide logger. `RUST_LOG` overrides the `info` default.
pub fn init_logger() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
