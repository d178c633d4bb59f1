//! Prometheus text exposition format.
//!
//! Renders cumulative demand totals for scraping by a Prometheus
//! server or compatible agent.

use autoprov_state::CountTotal;

/// Render demand totals into Prometheus text format.
///
/// Produces one COUNTER with `app`, `apporg`, `appver`, `zone` and
/// `zoneorg` labels per (app, zone).
pub fn render_prometheus(totals: &[CountTotal]) -> String {
    let mut out = String::new();

    out.push_str("# HELP autoprov_client_count Cumulative qualifying client events.\n");
    out.push_str("# TYPE autoprov_client_count counter\n");
    for t in totals {
        out.push_str(&format!(
            "autoprov_client_count{{app=\"{}\",apporg=\"{}\",appver=\"{}\",zone=\"{}\",zoneorg=\"{}\"}} {}\n",
            escape(&t.app_key.name),
            escape(&t.app_key.organization),
            escape(&t.app_key.version),
            escape(&t.zone_key.name),
            escape(&t.zone_key.organization),
            t.count
        ));
    }

    out.push_str("# HELP autoprov_tracked_pairs Number of (app, zone) pairs with reported demand.\n");
    out.push_str("# TYPE autoprov_tracked_pairs gauge\n");
    out.push_str(&format!("autoprov_tracked_pairs {}\n", totals.len()));

    out
}

/// Escape a label value.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprov_core::{AppKey, ZoneKey};

    fn total(app: &str, zone: &str, count: u64) -> CountTotal {
        CountTotal {
            app_key: AppKey::new("acme", app, "1.0"),
            zone_key: ZoneKey::new("op", zone),
            count,
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&[]);
        // Should still have type declarations.
        assert!(output.contains("# HELP autoprov_client_count"));
        assert!(output.contains("# TYPE autoprov_client_count counter"));
        assert!(output.contains("autoprov_tracked_pairs 0"));
    }

    #[test]
    fn render_totals() {
        let output = render_prometheus(&[total("game", "west", 42), total("chat", "east", 7)]);

        assert!(output.contains(
            "autoprov_client_count{app=\"game\",apporg=\"acme\",appver=\"1.0\",zone=\"west\",zoneorg=\"op\"} 42"
        ));
        assert!(output.contains("zone=\"east\",zoneorg=\"op\"} 7"));
        assert!(output.contains("autoprov_tracked_pairs 2"));
    }

    #[test]
    fn label_values_escaped() {
        let output = render_prometheus(&[total("say \"hi\"", "west", 1)]);
        assert!(output.contains("app=\"say \\\"hi\\\"\""));
    }
}
