fn main() -> anyhow::Result<()> {
    schedule_sql_lib::run()
}
