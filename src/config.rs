use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::flow::FlowVariant;

/// Everything a monitoring run needs: target site strings, the flow
/// variant, timeouts, retry budget and the notification topic. Defaults
/// match the San Francisco consulate flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Landing page carrying the appointment link.
    pub start_url: String,
    /// Exact-ish text of the link opening the booking sub-site.
    pub booking_link_text: String,
    /// Text of the service link inside the booking flow.
    pub service_link_text: String,
    /// Literal message the booking site shows when nothing is bookable.
    pub no_slots_message: String,
    /// Fragment of the booking iframe's src URL.
    pub frame_url_fragment: String,
    /// `value` attribute of the cookie-consent accept control.
    pub cookie_accept_value: String,
    /// Element id of the CAPTCHA continue button.
    pub captcha_button_id: String,
    /// Element id of the "Importante" dialog's accept button.
    pub notice_button_id: String,
    /// `title` attribute marking an available calendar cell.
    pub available_title: String,

    pub variant: FlowVariant,
    /// Overrides the variant's default retry budget when set.
    pub max_attempts: Option<u32>,

    pub wait_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub settle_pause_ms: u64,

    pub ntfy_endpoint: String,
    pub ntfy_topic: String,

    pub headless: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            start_url: "https://www.exteriores.gob.es/Consulados/sanfrancisco/es/Comunicacion/Noticias/Paginas/Articulos/Ley-de-la-memoria-democr%C3%A1tica.aspx".to_string(),
            booking_link_text: "ELEGIR FECHA Y HORA".to_string(),
            service_link_text: "PRESENTACIÓN DE DOCUMENTACIÓN".to_string(),
            no_slots_message: "No hay horas disponibles para el servicio seleccionado".to_string(),
            frame_url_fragment: "citaconsular.es".to_string(),
            cookie_accept_value: "Aceptar".to_string(),
            captcha_button_id: "idCaptchaButton".to_string(),
            notice_button_id: "bktContinue".to_string(),
            available_title: "DISPONIBLE".to_string(),
            variant: FlowVariant::AlwaysDeep,
            max_attempts: None,
            wait_timeout_secs: 20,
            probe_timeout_secs: 5,
            settle_pause_ms: 1000,
            ntfy_endpoint: "https://ntfy.sh".to_string(),
            ntfy_topic: "cita-alerts-f8x2y9".to_string(),
            headless: true,
        }
    }
}

impl MonitorConfig {
    /// Load from a JSON file, falling back to defaults for absent fields.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open config file {}", path.display()))?;
        let reader = BufReader::new(file);
        let config: Self = serde_json::from_reader(reader)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Environment overrides, read after `dotenvy::dotenv()` has run.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("CITA_URL") {
            self.start_url = url;
        }
        if let Ok(topic) = std::env::var("CITA_NTFY_TOPIC") {
            self.ntfy_topic = topic;
        }
    }

    /// Retry budget: explicit override, or the variant's default
    /// (10 for the always-deep flow, 1 for the early-exit flow).
    pub fn attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(self.variant.default_attempts())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_millis(self.settle_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_site() {
        let cfg = MonitorConfig::default();
        assert_eq!(cfg.variant, FlowVariant::AlwaysDeep);
        assert_eq!(cfg.attempts(), 10);
        assert_eq!(cfg.cookie_accept_value, "Aceptar");
        assert_eq!(cfg.captcha_button_id, "idCaptchaButton");
        assert_eq!(cfg.wait_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn early_exit_variant_does_not_retry_by_default() {
        let cfg = MonitorConfig {
            variant: FlowVariant::EarlyExit,
            ..Default::default()
        };
        assert_eq!(cfg.attempts(), 1);
    }

    #[test]
    fn explicit_attempts_override_variant_default() {
        let cfg = MonitorConfig {
            variant: FlowVariant::EarlyExit,
            max_attempts: Some(3),
            ..Default::default()
        };
        assert_eq!(cfg.attempts(), 3);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = MonitorConfig {
            variant: FlowVariant::EarlyExit,
            max_attempts: Some(4),
            ntfy_topic: "round-trip-topic".to_string(),
            headless: false,
            ..Default::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let cfg: MonitorConfig =
            serde_json::from_str(r#"{"variant":"early-exit","ntfy_topic":"my-topic"}"#).unwrap();
        assert_eq!(cfg.variant, FlowVariant::EarlyExit);
        assert_eq!(cfg.ntfy_topic, "my-topic");
        assert_eq!(cfg.booking_link_text, "ELEGIR FECHA Y HORA");
    }
}
