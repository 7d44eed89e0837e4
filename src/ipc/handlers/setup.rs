use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::report::{SchoolInfo, SheetOptions};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    School,
    ResultSheet,
    Exports,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::School, Self::ResultSheet, Self::Exports];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "resultSheet" => Some(Self::ResultSheet),
            "exports" => Some(Self::Exports),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::ResultSheet => "resultSheet",
            Self::Exports => "exports",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::ResultSheet => "setup.resultSheet",
            Self::Exports => "setup.exports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "name": "",
            "address": "",
            "motto": "",
            "logoPath": null
        }),
        SetupSection::ResultSheet => json!({
            "showGradeKey": true,
            "showAffectiveDomain": true,
            "showPsychomotorDomain": true,
            "defaultDaysSchoolOpened": 0,
            "defaultDomainMaxScore": 5
        }),
        SetupSection::Exports => json!({
            "defaultDirectory": "",
            "includeGeneratedAt": false
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    Ok(Value::String(s))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "name" | "motto" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "address" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 240)?));
                }
                "logoPath" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::ResultSheet => match k.as_str() {
                "showGradeKey" | "showAffectiveDomain" | "showPsychomotorDomain" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "defaultDaysSchoolOpened" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 366)?));
                }
                "defaultDomainMaxScore" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 10)?));
                }
                _ => return Err(format!("unknown resultSheet field: {}", k)),
            },
            SetupSection::Exports => match k.as_str() {
                "defaultDirectory" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 1024)?));
                }
                "includeGeneratedAt" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown exports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup reads.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

pub fn load_school(conn: &rusqlite::Connection) -> anyhow::Result<SchoolInfo> {
    Ok(serde_json::from_value(load_section(conn, SetupSection::School)?)?)
}

pub struct SheetSettings {
    pub options: SheetOptions,
    pub default_days_school_opened: u32,
    pub default_domain_max_score: f64,
}

pub fn load_sheet_settings(conn: &rusqlite::Connection) -> anyhow::Result<SheetSettings> {
    let v = load_section(conn, SetupSection::ResultSheet)?;
    let flag = |k: &str| v.get(k).and_then(|b| b.as_bool()).unwrap_or(true);
    let options = SheetOptions {
        show_grade_key: flag("showGradeKey"),
        show_affective_domain: flag("showAffectiveDomain"),
        show_psychomotor_domain: flag("showPsychomotorDomain"),
    };
    Ok(SheetSettings {
        options,
        default_days_school_opened: v
            .get("defaultDaysSchoolOpened")
            .and_then(|d| d.as_u64())
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(0),
        default_domain_max_score: v
            .get("defaultDomainMaxScore")
            .and_then(|d| d.as_f64())
            .unwrap_or(5.0),
    })
}

pub struct ExportSettings {
    pub default_directory: Option<String>,
    pub include_generated_at: bool,
}

pub fn load_export_settings(conn: &rusqlite::Connection) -> anyhow::Result<ExportSettings> {
    let v = load_section(conn, SetupSection::Exports)?;
    Ok(ExportSettings {
        default_directory: v
            .get("defaultDirectory")
            .and_then(|d| d.as_str())
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        include_generated_at: v
            .get("includeGeneratedAt")
            .and_then(|b| b.as_bool())
            .unwrap_or(false),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true, section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_unknown_and_out_of_range_fields() {
        let mut current = default_section(SetupSection::ResultSheet);
        let bad = json!({ "defaultDaysSchoolOpened": 400 });
        assert!(merge_section_patch(
            SetupSection::ResultSheet,
            &mut current,
            bad.as_object().expect("object")
        )
        .is_err());

        let unknown = json!({ "colour": "red" });
        assert!(merge_section_patch(
            SetupSection::School,
            &mut default_section(SetupSection::School),
            unknown.as_object().expect("object")
        )
        .is_err());

        let good = json!({ "showGradeKey": false, "defaultDaysSchoolOpened": 90 });
        merge_section_patch(
            SetupSection::ResultSheet,
            &mut current,
            good.as_object().expect("object"),
        )
        .expect("valid patch");
        assert_eq!(current["showGradeKey"], false);
        assert_eq!(current["defaultDaysSchoolOpened"], 90);
    }
}
