//! jq 模块：JSON 路径查询。
//!
//! 支持 `.a.b[0].c` 形式的点路径与下标，命中结果以 JSON 文本
//! 返回，路径落空抛运行时异常。

use super::rt_err;
use rhai::{Engine, EvalAltResult, Module};
use serde_json::Value;

enum Step {
    Field(String),
    Index(usize),
}

fn parse_query(query: &str) -> Result<Vec<Step>, Box<EvalAltResult>> {
    let query = query.trim();
    let body = query
        .strip_prefix('.')
        .ok_or_else(|| rt_err(format!("query must start with '.': {query}")))?;
    let mut steps = Vec::new();
    if body.is_empty() {
        return Ok(steps);
    }
    for segment in body.split('.') {
        let mut rest = segment;
        // 段前的字段名，后随零或多个 [idx]
        if let Some(bracket) = rest.find('[') {
            let (name, tail) = rest.split_at(bracket);
            if !name.is_empty() {
                steps.push(Step::Field(name.to_string()));
            }
            rest = tail;
            while let Some(tail) = rest.strip_prefix('[') {
                let end = tail
                    .find(']')
                    .ok_or_else(|| rt_err(format!("unterminated index in: {segment}")))?;
                let index: usize = tail[..end]
                    .parse()
                    .map_err(|_| rt_err(format!("bad index in: {segment}")))?;
                steps.push(Step::Index(index));
                rest = &tail[end + 1..];
            }
            if !rest.is_empty() {
                return Err(rt_err(format!("bad segment: {segment}")));
            }
        } else {
            if rest.is_empty() {
                return Err(rt_err(format!("empty segment in: {query}")));
            }
            steps.push(Step::Field(rest.to_string()));
        }
    }
    Ok(steps)
}

fn execute(query: &str, json_text: &str) -> Result<String, Box<EvalAltResult>> {
    let root: Value =
        serde_json::from_str(json_text).map_err(|e| rt_err(format!("bad json: {e}")))?;
    let mut current = &root;
    for step in parse_query(query)? {
        current = match step {
            Step::Field(name) => current
                .get(&name)
                .ok_or_else(|| rt_err(format!("no such field: {name}")))?,
            Step::Index(index) => current
                .get(index)
                .ok_or_else(|| rt_err(format!("index {index} out of range")))?,
        };
    }
    serde_json::to_string(current).map_err(|e| rt_err(format!("encode: {e}")))
}

pub(super) fn register(engine: &mut Engine) {
    let mut module = Module::new();
    module.set_native_fn("Execute", |query: &str, json_text: &str| {
        execute(query, json_text)
    });
    engine.register_static_module("jq", module.into());
}
