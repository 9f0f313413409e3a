//! Printer catalogue and the default state tree.

use serde::Serialize;
use serde_json::{json, Value};

/// Application version recorded in `app.version`.
pub const APP_VERSION: &str = "2.6.4";

/// Model selected on a fresh start.
pub const DEFAULT_PRINTER: &str = "P700P900";

/// Default chart zoom index (100% in 10% steps).
pub const DEFAULT_CHART_ZOOM_INDEX: u32 = 9;

/// A supported printer model and its ink channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Printer {
    pub model: &'static str,
    pub name: &'static str,
    pub channels: &'static [&'static str],
}

const CMYK_LIGHT: &[&str] = &["K", "C", "M", "Y", "LC", "LM"];
const EIGHT_CHANNEL: &[&str] = &["K", "C", "M", "Y", "LC", "LM", "LK", "LLK"];
const TEN_CHANNEL_OR_GR: &[&str] = &["K", "C", "M", "Y", "LC", "LM", "LK", "LLK", "OR", "GR"];
const TEN_CHANNEL_V_MK: &[&str] = &["K", "C", "M", "Y", "LC", "LM", "LK", "LLK", "V", "MK"];

/// Every printer model known to the editor.
pub const PRINTERS: &[Printer] = &[
    Printer { model: "P400", name: "Epson P400", channels: CMYK_LIGHT },
    Printer { model: "P800", name: "Epson P600-P800", channels: EIGHT_CHANNEL },
    Printer { model: "3880-7880", name: "Epson 3880-7880", channels: EIGHT_CHANNEL },
    Printer { model: "x800-x890", name: "Epson x800-x890", channels: EIGHT_CHANNEL },
    Printer { model: "x900", name: "Epson x900", channels: TEN_CHANNEL_OR_GR },
    Printer { model: "P4-6-8000", name: "Epson P4-6-8000", channels: EIGHT_CHANNEL },
    Printer { model: "P5-7-9000", name: "Epson P5-7-9000", channels: TEN_CHANNEL_OR_GR },
    Printer { model: "P700P900", name: "Epson P700-P900", channels: TEN_CHANNEL_V_MK },
];

/// Look up a printer by model id.
pub fn printer(model: &str) -> Option<&'static Printer> {
    PRINTERS.iter().find(|p| p.model == model)
}

/// The default printer.
pub fn default_printer() -> &'static Printer {
    PRINTERS
        .iter()
        .find(|p| p.model == DEFAULT_PRINTER)
        .unwrap_or(&PRINTERS[PRINTERS.len() - 1])
}

/// Build a fresh default state tree.
pub fn initial_state() -> Value {
    json!({
        "app": {
            "version": APP_VERSION,
            "debugLogs": false,
            "debugAI": false,
            "chartZoomIndex": DEFAULT_CHART_ZOOM_INDEX,
            "editMode": false,
            "editSelection": {
                "channel": null,
                "ordinal": 1
            },
            "darkMode": true,
            "logoAnimatedOnce": false
        },
        "printer": {
            "currentModel": DEFAULT_PRINTER,
            "channels": default_printer().channels,
            "channelValues": {},
            "channelStates": {},
            "channelPreviousValues": {}
        },
        "curves": {
            "loadedQuadData": null,
            "smartCurves": {},
            "keyPoints": {},
            "keyPointsMeta": {},
            "sources": {}
        },
        "linearization": {
            "global": {
                "data": null,
                "applied": false,
                "filename": "",
                "enabled": false,
                "baked": null
            },
            "perChannel": {
                "data": {},
                "enabled": {}
            }
        },
        "ui": {
            "activeTab": "main",
            "modalOpen": null,
            "statusMessage": "",
            "processingState": false,
            "filenames": {
                "quadFile": "",
                "globalLinearization": "",
                "perChannelLinearization": {}
            }
        },
        "files": {
            "loadedFiles": {},
            "recentFiles": [],
            "autoSaveEnabled": false,
            "lastSaveTime": null
        },
        "scaling": {
            "globalPercent": 100,
            "baselines": null,
            "maxAllowed": 1000,
            "isActive": false
        },
        "computed": {}
    })
}
