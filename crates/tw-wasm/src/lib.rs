//! WebAssembly bindings for TabWarden

use serde::Serialize;
use wasm_bindgen::prelude::*;

use tw_config::{build_engine_config, ConfigSources};
use tw_core::{
    events::{EngineMessage, HostEvent, Outcome},
    psl::PublicSuffixes,
    services::{MemorySettings, Services},
    types::{BlockingResponse, Header},
    Engine, EngineReply, TabId,
};

/// Engine instance owned by the extension's background page.
#[wasm_bindgen]
pub struct WasmEngine {
    engine: Engine,
}

#[wasm_bindgen]
impl WasmEngine {
    /// Compile the configuration and start an engine.
    ///
    /// `settings_json` is the settings object loaded from storage; pass
    /// `undefined` while storage is still loading.
    #[wasm_bindgen(constructor)]
    pub fn new(
        privacy_config: &str,
        tracker_data: Option<String>,
        https_hosts: Option<String>,
        public_suffix_list: Option<String>,
        host_mode: Option<String>,
        topics_available: bool,
        settings_json: Option<String>,
    ) -> Result<WasmEngine, JsValue> {
        let sources = ConfigSources {
            privacy_config,
            tracker_data: tracker_data.as_deref(),
            https_hosts: https_hosts.as_deref(),
            public_suffix_list: public_suffix_list.as_deref(),
            host_mode: host_mode.as_deref(),
            topics_available,
        };
        let (config, _stats) = build_engine_config(&sources).map_err(|e| {
            let message = format!("Failed to compile config: {e}");
            web_sys::console::error_1(&JsValue::from_str(&message));
            JsValue::from_str(&message)
        })?;

        let settings = match settings_json {
            Some(json) => {
                let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&json)
                    .map_err(|e| JsValue::from_str(&format!("Invalid settings: {e}")))?;
                MemorySettings::with_values(values)
            }
            None => MemorySettings::not_ready(),
        };

        Ok(WasmEngine {
            engine: Engine::new(config, Services::with_settings(settings)),
        })
    }

    /// Handle one host event given as JSON (`{"event": "beforeRequest", ...}`).
    ///
    /// Returns `{ response, notices }` where `response` follows the host's
    /// blocking-response shape.
    pub fn handle_event(&mut self, event_json: &str) -> Result<JsValue, JsValue> {
        let event: HostEvent = serde_json::from_str(event_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid event: {e}")))?;
        let outcome = self.engine.handle_event(event);
        Ok(outcome_to_js(&outcome))
    }

    /// Serialized Tab State, or `null` for an unknown tab.
    pub fn get_tab(&self, tab_id: i32) -> JsValue {
        match self.engine.tabs().snapshot(TabId(tab_id)) {
            Some(snapshot) => to_js(&snapshot),
            None => JsValue::NULL,
        }
    }

    pub fn list_tabs(&self) -> JsValue {
        to_js(&self.engine.tabs().snapshots())
    }

    pub fn upgrade_counts(&self) -> JsValue {
        let counts = self.engine.upgrade_counts();
        let result = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&result, &"totalUpgrades".into(), &JsValue::from(counts.total_upgrades as f64));
        let _ = js_sys::Reflect::set(&result, &"failedUpgrades".into(), &JsValue::from(counts.failed_upgrades as f64));
        result.into()
    }

    /// Storage finished loading; `settings_json` is the stored settings object.
    pub fn load_settings(&mut self, settings_json: &str) -> Result<(), JsValue> {
        let values: serde_json::Map<String, serde_json::Value> = serde_json::from_str(settings_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid settings: {e}")))?;
        self.engine.handle_message(EngineMessage::SettingsLoaded(values));
        Ok(())
    }

    pub fn update_setting(&mut self, key: &str, value_json: &str) -> Result<(), JsValue> {
        let value: serde_json::Value = serde_json::from_str(value_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid setting value: {e}")))?;
        self.setting_reply(EngineMessage::UpdateSetting { key: key.to_string(), value })
    }

    pub fn remove_setting(&mut self, key: &str) -> Result<(), JsValue> {
        self.setting_reply(EngineMessage::RemoveSetting { key: key.to_string() })
    }

    /// The user asked to load blocked embedded content on a tab.
    pub fn allow_click_to_load(&mut self, tab_id: i32, domain: &str) {
        self.engine.handle_message(EngineMessage::AllowClickToLoad {
            tab_id: TabId(tab_id),
            domain: domain.to_string(),
        });
    }

    /// Drop every tab and flush session rules before the page unloads.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }

    fn setting_reply(&mut self, message: EngineMessage) -> Result<(), JsValue> {
        match self.engine.handle_message(message) {
            EngineReply::Setting(Ok(())) => Ok(()),
            EngineReply::Setting(Err(e)) => Err(JsValue::from_str(&e.to_string())),
            _ => Err(JsValue::from_str("Unexpected engine reply")),
        }
    }
}

#[wasm_bindgen]
pub fn get_base_domain(host: &str) -> String {
    PublicSuffixes::heuristic().base_domain(host)
}

fn to_js<T: Serialize>(value: &T) -> JsValue {
    match serde_json::to_string(value) {
        Ok(json) => js_sys::JSON::parse(&json).unwrap_or(JsValue::NULL),
        Err(e) => {
            web_sys::console::warn_1(&JsValue::from_str(&format!("Failed to serialize: {e}")));
            JsValue::NULL
        }
    }
}

fn headers_to_js(headers: &[Header]) -> js_sys::Array {
    let array = js_sys::Array::new_with_length(headers.len() as u32);
    for (i, header) in headers.iter().enumerate() {
        let entry = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&entry, &"name".into(), &JsValue::from_str(&header.name));
        let _ = js_sys::Reflect::set(&entry, &"value".into(), &JsValue::from_str(&header.value));
        array.set(i as u32, entry.into());
    }
    array
}

fn response_to_js(response: &BlockingResponse) -> JsValue {
    let result = js_sys::Object::new();
    if response.cancel {
        let _ = js_sys::Reflect::set(&result, &"cancel".into(), &JsValue::from(true));
    }
    if let Some(url) = &response.redirect_url {
        let _ = js_sys::Reflect::set(&result, &"redirectUrl".into(), &JsValue::from_str(url));
    }
    if let Some(headers) = &response.request_headers {
        let _ = js_sys::Reflect::set(&result, &"requestHeaders".into(), &headers_to_js(headers));
    }
    if let Some(headers) = &response.response_headers {
        let _ = js_sys::Reflect::set(&result, &"responseHeaders".into(), &headers_to_js(headers));
    }
    result.into()
}

fn outcome_to_js(outcome: &Outcome) -> JsValue {
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"response".into(), &response_to_js(&outcome.response));

    let notices = js_sys::Array::new_with_length(outcome.notices.len() as u32);
    for (i, notice) in outcome.notices.iter().enumerate() {
        notices.set(i as u32, to_js(notice));
    }
    let _ = js_sys::Reflect::set(&result, &"notices".into(), &notices);
    result.into()
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    const CONFIG: &str = r#"{"features": {"gpc": {"state": "enabled"}}}"#;

    fn engine() -> WasmEngine {
        WasmEngine::new(CONFIG, None, None, None, None, false, Some("{}".to_string())).expect("engine should start")
    }

    #[wasm_bindgen_test]
    fn injects_gpc_header() {
        let mut engine = engine();
        let outcome = engine
            .handle_event(
                r#"{"event": "beforeSendHeaders", "requestId": "1", "tabId": 4, "url": "https://example.com/", "type": "main_frame", "requestHeaders": []}"#,
            )
            .expect("event should parse");
        let response = js_sys::Reflect::get(&outcome, &"response".into()).expect("response");
        let headers = js_sys::Reflect::get(&response, &"requestHeaders".into()).expect("headers");
        assert!(js_sys::Array::is_array(&headers));
    }

    #[wasm_bindgen_test]
    fn rejects_malformed_event() {
        assert!(engine().handle_event("{").is_err());
    }

    #[wasm_bindgen_test]
    fn settings_writable_after_load() {
        let mut engine = WasmEngine::new(CONFIG, None, None, None, None, false, None).expect("engine should start");
        assert!(engine.update_setting("GPC", "false").is_err());
        engine.load_settings("{}").expect("settings should load");
        assert!(engine.update_setting("GPC", "false").is_ok());
    }

    #[wasm_bindgen_test]
    fn unknown_tab_is_null() {
        assert!(engine().get_tab(99).is_null());
    }
}
