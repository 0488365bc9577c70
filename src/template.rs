//! Command templates with `{{NAME}}` placeholders.
//!
//! Human-authored commands name a variable instead of a concrete value,
//! e.g. `{{INPUTSOURCE_VARIABLES}}`. The known variables and their legal
//! values are listed in [`VARIABLE_DOMAINS`]. The `cisip2` front end checks
//! `--var` values against these tables; the client library does not.

/// Legal values for one placeholder variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableDomain {
    /// Placeholder name as written inside `{{ }}`.
    pub name: &'static str,
    /// Accepted values.
    pub values: &'static [&'static str],
}

impl VariableDomain {
    /// Whether `value` is one of the legal values.
    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(&value)
    }
}

const PRESETS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30",
];

/// Every placeholder variable the receiver's command set uses.
pub const VARIABLE_DOMAINS: &[VariableDomain] = &[
    VariableDomain {
        name: "INPUTSOURCE_VARIABLES",
        values: &[
            "am", "aux", "bd", "catv", "cd", "dvd", "fm", "game", "sacd", "sat", "source", "stb",
            "tuner", "tv", "video",
        ],
    },
    VariableDomain {
        name: "INPUTCONFIG_VARIABLES",
        values: &["AUX", "BD", "CATV", "CD", "GAME", "SACD", "SAT", "STB", "TV", "VIDEO"],
    },
    VariableDomain {
        name: "ICON_VARIABLES",
        values: &[
            "TV", "bd", "bddvd", "camcorder", "camera", "cd", "dvd", "game", "mobile", "net",
            "stb1", "stb2", "tape", "tuner", "turntable", "vcr",
        ],
    },
    VariableDomain {
        name: "SOUNDFIELD_VARIABLES",
        values: &[
            "2ch", "afd", "direct", "hddcs", "multi", "neo6", "neo6_movie", "pl2", "pl2_movie",
            "pl2x", "pl2x_movie",
        ],
    },
    VariableDomain {
        name: "AM_VARIABLES",
        values: PRESETS,
    },
    VariableDomain {
        name: "FM_VARIABLES",
        values: PRESETS,
    },
    VariableDomain {
        name: "TRIGGERS_VARIABLES",
        values: &["trigger1", "trigger2", "trigger3"],
    },
];

/// Look up a placeholder variable by name.
pub fn variable_domain(name: &str) -> Option<&'static VariableDomain> {
    VARIABLE_DOMAINS.iter().find(|domain| domain.name == name)
}

/// Replace every `{{NAME}}` in `template` with its value from `vars`.
///
/// Placeholders without a matching entry are left untouched.
pub fn replace_placeholders<K, V>(template: &str, vars: impl IntoIterator<Item = (K, V)>) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = template.to_string();
    for (name, value) in vars {
        let placeholder = format!("{{{{{}}}}}", name.as_ref());
        out = out.replace(&placeholder, value.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replaces_every_occurrence() {
        let out = replace_placeholders("{{A}}-{{B}}-{{A}}", [("A", "x"), ("B", "y")]);
        assert_eq!(out, "x-y-x");
    }

    #[test]
    fn test_unknown_placeholder_left_alone() {
        let out = replace_placeholders("main.{{ZONE}}", [("OTHER", "zone2")]);
        assert_eq!(out, "main.{{ZONE}}");
    }

    #[test]
    fn test_single_braces_untouched() {
        let out = replace_placeholders(r#"{"value": {{V}}}"#, [("V", "\"bd\"")]);
        assert_eq!(out, r#"{"value": "bd"}"#);
    }

    #[test]
    fn test_variable_domain_lookup() {
        let inputs = variable_domain("INPUTSOURCE_VARIABLES").unwrap();
        assert!(inputs.contains("bd"));
        assert!(!inputs.contains("BD"));

        let presets = variable_domain("FM_VARIABLES").unwrap();
        assert_eq!(presets.values.len(), 30);
        assert!(presets.contains("12"));

        assert!(variable_domain("VOLUME_VARIABLES").is_none());
    }
}
