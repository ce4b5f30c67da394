//! Weather lookup tool — stub that returns mock weather data.
//!
//! In production this would call a real weather API (OpenWeatherMap,
//! etc.). The stub returns deterministic, plausible weather data so the
//! run loop can be exercised end-to-end without network access.

use async_trait::async_trait;
use tidepool_core::error::ToolError;
use tidepool_core::tool::Tool;

pub struct WeatherLookupTool;

#[async_trait]
impl Tool for WeatherLookupTool {
    fn name(&self) -> &str {
        "weather_lookup"
    }

    fn description(&self) -> &str {
        "Look up current weather conditions for a location. Returns temperature, conditions, humidity, and wind speed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "city": {
                    "type": "string",
                    "description": "The city name to look up weather for"
                },
                "units": {
                    "type": "string",
                    "enum": ["metric", "imperial"],
                    "description": "Temperature units (default: metric)",
                    "default": "metric"
                }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let city = arguments["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'city' argument".into()))?;

        let units = arguments["units"].as_str().unwrap_or("metric");
        let weather = generate_mock_weather(city, units);
        Ok(serde_json::to_string_pretty(&weather).unwrap_or_default())
    }
}

#[derive(serde::Serialize)]
struct WeatherData {
    city: String,
    temperature: f64,
    units: String,
    conditions: String,
    humidity: u32,
    wind_speed: f64,
}

/// Generate deterministic mock weather based on city name hash.
fn generate_mock_weather(city: &str, units: &str) -> WeatherData {
    let hash: u32 = city
        .bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));

    let conditions_list = [
        "Clear skies",
        "Partly cloudy",
        "Overcast",
        "Light rain",
        "Heavy rain",
        "Thunderstorms",
        "Snow",
        "Foggy",
    ];

    let base_temp_c = ((hash % 40) as f64) - 5.0; // -5 to 35°C
    let (temperature, unit_label) = if units == "imperial" {
        (base_temp_c * 9.0 / 5.0 + 32.0, "°F")
    } else {
        (base_temp_c, "°C")
    };

    WeatherData {
        city: city.to_string(),
        temperature: (temperature * 10.0).round() / 10.0,
        units: unit_label.to_string(),
        conditions: conditions_list[(hash as usize / 7) % conditions_list.len()].to_string(),
        humidity: 30 + (hash % 60),
        wind_speed: ((hash % 30) as f64) + 5.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lookup_returns_weather() {
        let tool = WeatherLookupTool;
        let output = tool
            .execute(serde_json::json!({"city": "Paris"}))
            .await
            .unwrap();

        assert!(output.contains("Paris"));
        assert!(output.contains("temperature"));
    }

    #[tokio::test]
    async fn imperial_units() {
        let tool = WeatherLookupTool;
        let output = tool
            .execute(serde_json::json!({"city": "New York", "units": "imperial"}))
            .await
            .unwrap();

        assert!(output.contains("°F"));
    }

    #[tokio::test]
    async fn deterministic_results() {
        let tool = WeatherLookupTool;
        let r1 = tool
            .execute(serde_json::json!({"city": "London"}))
            .await
            .unwrap();
        let r2 = tool
            .execute(serde_json::json!({"city": "London"}))
            .await
            .unwrap();

        assert_eq!(r1, r2);
    }

    #[tokio::test]
    async fn missing_city_returns_error() {
        let tool = WeatherLookupTool;
        let result = tool.execute(serde_json::json!({})).await;
        assert!(result.is_err());
    }

    #[test]
    fn tool_definition() {
        let tool = WeatherLookupTool;
        let def = tool.to_definition();
        assert_eq!(def.name, "weather_lookup");
    }
}
