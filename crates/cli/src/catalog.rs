// Built-in demo tools
//
// Decision: Demo tools start from the configured ToolDefaults so config changes are visible
// through `toolforge tools`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use toolforge_core::{InjectMarker, ToolRegistry};
use toolforge_runtime::ToolDefaults;

/// Registry holding the demo tools
pub fn demo_registry(defaults: &ToolDefaults) -> Result<Arc<ToolRegistry>> {
    let registry = Arc::new(ToolRegistry::new());

    registry.register(
        defaults
            .builder("add")
            .doc("Add two integers.\n\nReturns x + y.")
            .param::<i64>("x")
            .param::<i64>("y")
            .returns::<i64>()
            .profile("math")
            .async_handler(|args| async move {
                Ok(args.required::<i64>("x")? + args.required::<i64>("y")?)
            })
            .build()?,
    )?;

    registry.register(
        defaults
            .builder("echo")
            .doc("Repeat a piece of text.")
            .param::<String>("text")
            .param_with_default::<u32>("times", 1)
            .returns::<Vec<String>>()
            .profile("text")
            .async_handler(|args| async move {
                let text: String = args.required("text")?;
                let times: u32 = args.optional("times")?.unwrap_or(1);
                Ok(vec![text; times as usize])
            })
            .build()?,
    )?;

    registry.register(
        defaults
            .builder("greet")
            .doc("Greet the calling user.")
            .param_with_default::<String>("greeting", "Hello")
            .inject::<String>("user_id", InjectMarker::key("user_id"))
            .returns::<String>()
            .profile("text")
            .blocking_handler(|args| {
                let greeting: String = args
                    .optional("greeting")?
                    .unwrap_or_else(|| "Hello".to_string());
                let user: String = args.required("user_id")?;
                Ok(format!("{greeting}, {user}!"))
            })
            .build()?,
    )?;

    registry.register(
        defaults
            .builder("sleep")
            .doc("Block a worker thread for a number of seconds.")
            .param::<f64>("seconds")
            .returns::<f64>()
            .timeout(Duration::from_secs(5))
            .blocking_handler(|args| {
                let seconds: f64 = args.required("seconds")?;
                if !seconds.is_finite() || seconds < 0.0 {
                    bail!("seconds must be a non-negative number");
                }
                std::thread::sleep(Duration::from_secs_f64(seconds));
                Ok(seconds)
            })
            .build()?,
    )?;

    registry.register(
        defaults
            .builder("fail")
            .doc("Always fail, optionally with a custom message.")
            .optional_param::<String>("message")
            .max_attempts(1)
            .async_handler(|args| async move {
                let message: Option<String> = args.optional("message")?;
                Err::<(), _>(anyhow!(message.unwrap_or_else(|| "requested failure".to_string())))
            })
            .build()?,
    )?;

    Ok(registry)
}
