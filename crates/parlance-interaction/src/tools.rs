//! Callable tools exposed to personas during a run.

use async_trait::async_trait;
use parlance_core::{ParlanceError, Result};
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

/// A function a persona may call mid-run.
///
/// Tools are declared to the model with a JSON schema and invoked locally
/// by the runner when the model requests them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name declared to the model.
    fn name(&self) -> &str;

    /// Human-readable description declared to the model.
    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Invokes the tool with the model-provided arguments.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String>;
}

/// Demo tool that reports the weather for a city.
///
/// The condition is chosen uniformly at random; there is no real weather
/// backend.
#[derive(Debug, Clone, Default)]
pub struct WeatherTool;

const WEATHER_CONDITIONS: [&str; 4] = ["sunny", "cloudy", "rainy", "snowy"];

#[derive(Deserialize)]
struct WeatherArgs {
    city: String,
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather for a given city."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "Name of the city to look up."
                }
            },
            "required": ["city"]
        })
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String> {
        let args: WeatherArgs = serde_json::from_value(arguments)
            .map_err(|err| ParlanceError::runner(format!("invalid get_weather arguments: {err}")))?;

        debug!(city = %args.city, "get_weather called");

        let condition = WEATHER_CONDITIONS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("sunny");
        Ok(format!("The weather in {} is {}.", args.city, condition))
    }
}
