mod app;
mod http_source;
mod input;
mod renderer;

fn main() -> anyhow::Result<()> {
    app::run()
}
