//! Line-oriented payload decoders: device lists, forward lists, jdwp pids
//!
//! Each decoder keeps going past malformed lines, recording them as
//! [`ErrorLine`](adblib_core::ErrorLine)s.

use adblib_core::{
    DeviceInfo, DeviceList, ForwardSocketInfo, ForwardSocketList, ListWithErrors, ProcessIdList,
    ReverseSocketInfo, ReverseSocketList, SocketSpec,
};

const NO_PERMISSIONS: &str = "no permissions";

/// Iterate non-empty lines with their index
fn lines(payload: &str) -> impl Iterator<Item = (usize, &str)> {
    payload
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
}

/// Decode a `host:devices[-l]` / `host:track-devices[-l]` payload
///
/// Lines look like `serial<TAB>state` (short format) or
/// `serial   state product:x model:y device:z transport_id:N` (long format).
pub fn parse_device_list(payload: &str) -> DeviceList {
    let mut list = ListWithErrors::new();
    for (index, line) in lines(payload) {
        match parse_device_line(line) {
            Ok(info) => list.push_entry(info),
            Err(message) => list.push_error(index, message, line),
        }
    }
    list
}

fn parse_device_line(line: &str) -> std::result::Result<DeviceInfo, String> {
    let (serial, rest) = match line.split_once('\t') {
        Some((serial, rest)) => (serial.trim(), rest.trim()),
        None => {
            let trimmed = line.trim();
            match trimmed.split_once(char::is_whitespace) {
                Some((serial, rest)) => (serial, rest.trim()),
                None => return Err("Missing device state".to_string()),
            }
        }
    };
    if serial.is_empty() || rest.is_empty() {
        return Err("Missing device state".to_string());
    }

    let mut tokens = rest.split_whitespace().peekable();
    let state = if rest.starts_with(NO_PERMISSIONS) {
        // The state is followed by a free-form explanation; skip it
        tokens.next();
        tokens.next();
        while let Some(token) = tokens.peek() {
            if as_field(token).is_some() {
                break;
            }
            tokens.next();
        }
        NO_PERMISSIONS.to_string()
    } else {
        tokens
            .next()
            .map(str::to_string)
            .ok_or_else(|| "Missing device state".to_string())?
    };

    let mut info = DeviceInfo::new(serial, &state);
    for token in tokens {
        let (key, value) =
            as_field(token).ok_or_else(|| format!("Unexpected token {:?}", token))?;
        match key {
            "product" => info.product = Some(value.to_string()),
            "model" => info.model = Some(value.to_string()),
            "device" => info.device = Some(value.to_string()),
            "transport_id" => {
                let id = value
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid transport id {:?}", value))?;
                info.transport_id = Some(id);
            }
            _ => info
                .additional_fields
                .push((key.to_string(), value.to_string())),
        }
    }
    Ok(info)
}

/// Split a `key:value` token; keys are identifiers
fn as_field(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once(':')?;
    let valid_key = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid_key.then_some((key, value))
}

/// Render a device list the way the server does (used by fakes and tests)
pub fn format_device_list(devices: &[DeviceInfo], long_format: bool) -> String {
    let mut payload = String::new();
    for device in devices {
        payload.push_str(&format_device_line(device, long_format));
        payload.push('\n');
    }
    payload
}

fn format_device_line(device: &DeviceInfo, long_format: bool) -> String {
    if !long_format {
        return format!("{}\t{}", device.serial_number, device.device_state_string);
    }
    let mut line = format!(
        "{:<22} {}",
        device.serial_number, device.device_state_string
    );
    for (key, value) in device.additional_fields.iter() {
        line.push_str(&format!(" {}:{}", key, value));
    }
    let known = [
        ("product", device.product.as_deref()),
        ("model", device.model.as_deref()),
        ("device", device.device.as_deref()),
    ];
    for (key, value) in known {
        if let Some(value) = value {
            line.push_str(&format!(" {}:{}", key, value));
        }
    }
    if let Some(id) = device.transport_id {
        line.push_str(&format!(" transport_id:{}", id));
    }
    line
}

/// Decode `host:list-forward`: `serial local remote` per line
pub fn parse_forward_list(payload: &str) -> ForwardSocketList {
    let mut list = ListWithErrors::new();
    for (index, line) in lines(payload) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [serial, local, remote] => list.push_entry(ForwardSocketInfo {
                device_serial: serial.to_string(),
                local: SocketSpec::from_query_string(local),
                remote: SocketSpec::from_query_string(remote),
            }),
            _ => list.push_error(index, "Expected 3 fields", line),
        }
    }
    list
}

/// Decode `reverse:list-forward`: `transport remote local` per line
pub fn parse_reverse_list(payload: &str) -> ReverseSocketList {
    let mut list = ListWithErrors::new();
    for (index, line) in lines(payload) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [transport, remote, local] => list.push_entry(ReverseSocketInfo {
                transport_name: transport.to_string(),
                remote: SocketSpec::from_query_string(remote),
                local: SocketSpec::from_query_string(local),
            }),
            _ => list.push_error(index, "Expected 3 fields", line),
        }
    }
    list
}

/// Decode a `track-jdwp` update: one decimal process id per line
pub fn parse_process_id_list(payload: &str) -> ProcessIdList {
    let mut list = ListWithErrors::new();
    for (index, line) in lines(payload) {
        match line.trim().parse::<u32>() {
            Ok(pid) => list.push_entry(pid),
            Err(_) => list.push_error(index, "Invalid process id", line),
        }
    }
    list
}
