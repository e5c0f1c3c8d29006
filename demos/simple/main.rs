use std::time::Duration;

use ld_server_core::{Client, ConfigBuilder, ContextBuilder, Value};

pub fn main() -> ld_server_core::Result<()> {
    // Configure env_logger to see SDK logs.
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("ld_server_core"))
        .init();

    let sdk_key = std::env::var("LD_SDK_KEY").expect("LD_SDK_KEY env variable should contain SDK key");
    let client = Client::new(ConfigBuilder::new(sdk_key).build()?);

    // Block waiting for flag data. Until the client is initialized, every evaluation returns the
    // fallback value.
    if !client.start(Duration::from_secs(5)) {
        println!("client did not initialize in time, serving fallback values");
    }

    let mut context = ContextBuilder::new();
    context
        .add_kind("user", "test-user")?
        .set_name("user", "<your name>")?
        .set_attribute("user", "plan", Value::from("enterprise"))?;
    let context = context.build();

    let detail = client.bool_variation_detail(&context, "a-boolean-flag", false);
    println!("{}", serde_json::to_string_pretty(&detail).unwrap());

    client.track(&context, "demo-ran", None, None);

    // Deliver pending events before exiting.
    client.close();

    Ok(())
}
