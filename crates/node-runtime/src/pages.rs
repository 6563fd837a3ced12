//! HTML control page.

use crate::context::Snapshot;

const STYLE: &str = "body{font-family:sans-serif;margin:20px;background:#f0f0f0}\
.card{background:#fff;border-radius:8px;padding:12px;margin:8px 0}\
.relay{display:flex;align-items:center;gap:8px;margin:6px 0}\
.st{width:42px;font-weight:bold}.on{color:#2e7d32}.off{color:#c62828}\
button{padding:6px 14px;border:0;border-radius:4px;cursor:pointer}\
button.on{background:#4caf50;color:#fff}button.off{background:#f44336;color:#fff}\
button.pulse{background:#2196f3;color:#fff}.alarm{color:#c62828;font-weight:bold}";

fn value(v: Option<f32>, decimals: usize, unit: &str) -> String {
    match v {
        Some(v) => format!("{v:.decimals$} {unit}"),
        None => "--".to_string(),
    }
}

/// Render the control page. Unknown readings show as `--`.
#[must_use]
pub fn render_index(snapshot: &Snapshot, pulse_ms: u64) -> String {
    let mut body = String::with_capacity(4096);
    let climate = snapshot.climate.value();

    body.push_str(&format!(
        "<!DOCTYPE html><html><head><meta charset='utf-8'>\
         <meta name='viewport' content='width=device-width,initial-scale=1'>\
         <meta http-equiv='refresh' content='10'>\
         <title>Relay Node</title><style>{STYLE}</style></head><body>\
         <h1>Relay Node</h1><div class='card'>"
    ));
    body.push_str(&format!(
        "<p>Temperature: {}</p><p>Humidity: {}</p><p>Input: {}</p></div>",
        value(climate.map(|c| c.temperature), 1, "&deg;C"),
        value(climate.map(|c| c.humidity), 1, "%"),
        match snapshot.input {
            Some(true) => "HIGH",
            Some(false) => "LOW",
            None => "--",
        }
    ));

    let power = snapshot.power.value();
    body.push_str(&format!(
        "<div class='card'><h2>Power</h2><p>Voltage: {}</p><p>Current: {}</p>\
         <p>Power: {}</p><p>Energy: {}</p><p>Frequency: {}</p><p>Power factor: {}</p>",
        value(power.map(|p| p.voltage), 1, "V"),
        value(power.map(|p| p.current), 3, "A"),
        value(power.map(|p| p.power), 1, "W"),
        power.map_or_else(|| "--".to_string(), |p| format!("{} Wh", p.energy_wh)),
        value(power.map(|p| p.frequency), 1, "Hz"),
        value(power.map(|p| p.power_factor), 2, ""),
    ));
    if power.is_some_and(|p| p.alarm) {
        body.push_str("<p class='alarm'>POWER ALARM</p>");
    }
    body.push_str("</div><div class='card'><h2>Relays</h2>");

    for (i, on) in snapshot.relays.iter().enumerate() {
        let n = i + 1;
        let (class, label) = if *on { ("on", "ON") } else { ("off", "OFF") };
        body.push_str(&format!(
            "<div class='relay'><span>Relay {n}</span><span class='st {class}'>{label}</span>\
             <a href='/r?n={n}&s=1'><button class='on'>ON</button></a>\
             <a href='/r?n={n}&s=0'><button class='off'>OFF</button></a>\
             <a href='/p?n={n}'><button class='pulse'>PULSE</button></a></div>"
        ));
    }

    body.push_str(&format!(
        "<hr><a href='/a?s=1'><button class='on'>ALL ON</button></a> \
         <a href='/a?s=0'><button class='off'>ALL OFF</button></a>\
         <p><small>Pulse {pulse_ms} ms &middot; uptime {} s &middot; \
         <a href='/api'>api</a> &middot; <a href='/log'>log</a></small></p>\
         </div></body></html>",
        snapshot.uptime_ms / 1000
    ));
    body
}
