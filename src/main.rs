mod app;
mod crypto;
mod models;
mod otp;
mod storage;
mod ui;

fn main() -> anyhow::Result<()> {
    app::run()
}
