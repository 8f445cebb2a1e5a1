//! Keyed shared state that survives from server render into hydration.

use isle_payload::payload::STATE_PREFIX;
use isle_payload::{from_value, to_value, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::App;
use crate::error::Result;

/// A handle on one keyed state slot.
#[derive(Debug, Clone)]
pub struct State {
    app: App,
    key: String,
}

/// The state slot `key`, initialized with `init` if it holds nothing yet.
///
/// During hydration the server's value is already present and `init` is
/// not called.
pub fn use_state(app: &App, key: &str, init: impl FnOnce() -> Value) -> State {
    app.payload().state_or_init(key, init);
    State {
        app: app.clone(),
        key: key.to_string(),
    }
}

impl State {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self) -> Value {
        self.app.payload().state(&self.key).unwrap_or_default()
    }

    pub fn set(&self, value: Value) {
        self.app.payload().set_state(&self.key, value);
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(from_value(self.get())?)
    }

    pub fn set_from<T: Serialize>(&self, value: &T) -> Result<()> {
        self.set(to_value(value)?);
        Ok(())
    }
}

/// Remove the given state slots, or all of them with `None`.
pub fn clear_state(app: &App, keys: Option<&[&str]>) {
    let payload = app.payload();
    let keys: Vec<String> = match keys {
        Some(keys) => keys.iter().map(|k| k.to_string()).collect(),
        None => payload.read(|p| {
            p.state
                .keys()
                .filter_map(|k| k.strip_prefix(STATE_PREFIX).map(str::to_string))
                .collect()
        }),
    };
    for key in keys {
        payload.remove_state(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use isle_payload::Payload;

    #[test]
    fn init_runs_once_and_hydrated_value_wins() {
        let app = App::server(AppConfig::default());
        let counter = use_state(&app, "counter", || Value::from(1));
        counter.set(Value::from(5));
        let again = use_state(&app, "counter", || Value::from(100));
        assert_eq!(again.get(), Value::from(5));

        let mut payload = Payload::default();
        payload
            .state
            .insert(isle_payload::state_key("theme"), Value::from("dark"));
        let client = App::builder(crate::app::Platform::Client)
            .payload(payload)
            .build();
        let theme = use_state(&client, "theme", || panic!("hydrated state must be reused"));
        assert_eq!(theme.get_as::<String>().unwrap(), "dark");
    }

    #[test]
    fn typed_access_and_clear() {
        let app = App::server(AppConfig::default());
        let cart = use_state(&app, "cart", Value::array);
        cart.set_from(&vec!["apple", "pear"]).unwrap();
        assert_eq!(cart.get_as::<Vec<String>>().unwrap(), vec!["apple", "pear"]);

        use_state(&app, "other", || Value::from(true));
        clear_state(&app, Some(&["cart"][..]));
        assert_eq!(cart.get(), Value::Null);
        assert_eq!(app.payload().state("other"), Some(Value::from(true)));

        clear_state(&app, None);
        assert!(app.payload().state("other").is_none());
    }
}
