#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Minimal report with `pass` passing and `fail` failing tests in one suite.
pub fn report(pass: u32, fail: u32) -> String {
    let mut tests = String::new();
    for i in 0..pass + fail {
        let status = if i < pass { "PASS" } else { "FAIL" };
        tests.push_str(&format!(
            r#"<test id="s1-t{i}" name="Case {i}">
<kw name="Log" owner="BuiltIn">
<status status="PASS" start="2024-05-01T12:00:00.000000" elapsed="0.100"/>
</kw>
<status status="{status}" start="2024-05-01T12:00:00.000000" elapsed="0.200"/>
</test>
"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<robot generator="Robot 7.0" generated="2024-05-01T12:00:10.000000">
<suite id="s1" name="Smoke">
{tests}<status status="{root}" start="2024-05-01T12:00:00.000000" elapsed="1.000"/>
</suite>
<statistics>
<total>
<stat pass="{pass}" fail="{fail}" skip="0">All Tests</stat>
</total>
</statistics>
</robot>
"#,
        root = if fail > 0 { "FAIL" } else { "PASS" }
    )
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).expect("gzip write");
    enc.finish().expect("gzip finish")
}
