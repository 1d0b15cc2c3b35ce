use console::style;

/// Emits a named error notification, e.g. `JS` for bundler failures.
pub(crate) fn notification(title: &str, err: &anyhow::Error) {
    tracing::error!(
        %title,
        "{} {}",
        style(format!(" {title} ")).white().on_red().bold(),
        style(format!("{err:#}")).red()
    );
}
