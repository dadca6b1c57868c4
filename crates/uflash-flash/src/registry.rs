//! Programmer registry
//!
//! Opens controllers by name with `name:key=value,...` connection
//! descriptors and hands back the boxed controller contract. Which backends
//! exist is a compile-time feature choice, one crate per bridge.

use std::collections::HashMap;
use uflash_core::controller::SpiController;
use uflash_core::error::{Error, Result};

/// Parsed connection descriptor
pub struct ProgrammerParams {
    /// Canonical programmer name
    pub name: String,
    /// Key-value options after the colon
    pub params: HashMap<String, String>,
}

/// Parse `"name"` or `"name:key1=value1,key2=value2"`
pub fn parse_programmer_params(s: &str) -> Result<ProgrammerParams> {
    let (name, opts) = s.split_once(':').unwrap_or((s, ""));

    if name.is_empty() {
        return Err(Error::MissingConfig);
    }

    let mut params = HashMap::new();
    if !opts.is_empty() {
        for opt in opts.split(',') {
            let Some((key, value)) = opt.split_once('=') else {
                return Err(Error::InvalidConfig(format!(
                    "'{}' is not key=value",
                    opt
                )));
            };
            params.insert(key.to_string(), value.to_string());
        }
    }

    Ok(ProgrammerParams {
        name: name.to_string(),
        params,
    })
}

fn parse_index(params: &ProgrammerParams) -> Result<usize> {
    match params.params.get("index") {
        None => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("bad index '{}'", s))),
    }
}

/// Programmers compiled into this build, as (name, description)
pub fn list_programmers() -> Vec<(&'static str, &'static str)> {
    let mut out = Vec::new();
    #[cfg(feature = "dummy")]
    out.push(("dummy", "in-memory emulated chip (type=nor|nand)"));
    #[cfg(feature = "ch341a")]
    out.push(("ch341a", "WCH CH341A USB bridge (index=N)"));
    #[cfg(feature = "ch347")]
    out.push(("ch347", "WCH CH347T/CH347F USB bridge (index=N)"));
    out
}

/// Open a controller by its connection descriptor
pub fn open_controller(spec: &str) -> Result<Box<dyn SpiController>> {
    let params = parse_programmer_params(spec)?;

    match params.name.as_str() {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let kind = params
                .params
                .get("type")
                .map(String::as_str)
                .unwrap_or("nor");
            match kind {
                "nor" => Ok(Box::new(uflash_dummy::DummyController::new(
                    uflash_dummy::DummyNor::new_default(),
                ))),
                "nand" => Ok(Box::new(uflash_dummy::DummyController::new(
                    uflash_dummy::DummyNand::new_default(),
                ))),
                other => Err(Error::InvalidConfig(format!(
                    "unknown dummy chip type '{}'",
                    other
                ))),
            }
        }

        #[cfg(feature = "ch341a")]
        "ch341a" => {
            let index = parse_index(&params)?;
            let dev = uflash_ch341a::Ch341a::open_nth(index)?;
            Ok(Box::new(dev))
        }

        #[cfg(feature = "ch347")]
        "ch347" => {
            let index = parse_index(&params)?;
            let dev = uflash_ch347::Ch347::open_nth(index)?;
            Ok(Box::new(dev))
        }

        other => {
            log::error!("programmer '{}' is not compiled in", other);
            Err(Error::NotExist)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_parsing() {
        let p = parse_programmer_params("ch341a").unwrap();
        assert_eq!(p.name, "ch341a");
        assert!(p.params.is_empty());

        let p = parse_programmer_params("ch347:index=1,foo=bar").unwrap();
        assert_eq!(p.name, "ch347");
        assert_eq!(p.params.get("index").map(String::as_str), Some("1"));
        assert_eq!(p.params.get("foo").map(String::as_str), Some("bar"));

        assert!(parse_programmer_params("x:broken").is_err());
        assert!(parse_programmer_params("").is_err());
    }
}
