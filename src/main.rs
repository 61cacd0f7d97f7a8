fn main() -> anyhow::Result<()> {
    save_warden_lib::run()
}
