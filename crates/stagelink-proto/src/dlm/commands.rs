// DLM command builders
//
// Commands address processing modules by letter (A-D). `?` marks a query
// (the unit echoes the command with the value appended), `=` a parameter
// write, `!` an action trigger.

pub fn get_mute(module: &str) -> String {
    format!("Mod.In.Mute?{module}")
}

pub fn set_mute(module: &str, mute: bool) -> String {
    format!("Mod.In.Mute={module} {}", u8::from(mute))
}

pub fn get_gain(module: &str) -> String {
    format!("Mod.In.Gain?{module}")
}

pub fn set_gain(module: &str, gain_db: f64) -> String {
    format!("Mod.In.Gain={module} {gain_db:.2}")
}

pub fn recall_preset(index: u32) -> String {
    format!("Dev.Preset.Recall!{index}")
}

/// Whether a command expects a data response after its acknowledgement.
pub fn is_query(command: &str) -> bool {
    command.contains('?')
}
