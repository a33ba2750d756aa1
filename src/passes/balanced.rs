// Copyright 2026 the Whittle Project
// Licensed under the MIT License

//! Removal of balanced delimiter pairs.
//!
//! The state indexes into the list of balanced pairs, ordered by the
//! position of the opening delimiter, so nested pairs are attempted
//! outermost first. Three edit styles share the machinery: removing the
//! whole pair, removing only the two delimiter bytes, and blanking the
//! contents while keeping the pair.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{
    pass::{downcast_state, Pass, PassOutcome, PassState},
    variant::ProcessNotifier,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EditStyle {
    /// Remove the pair together with its contents.
    Whole,

    /// Remove the two delimiter bytes, keeping the contents.
    DelimitersOnly,

    /// Remove the contents, keeping the (now empty) pair.
    Inside,
}

#[derive(Debug)]
pub struct BalancedPass {
    arg: String,
    open: u8,
    close: u8,
    style: EditStyle,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct BalancedState {
    index: usize,
}

impl BalancedPass {
    pub fn new(arg: &str) -> Result<Self> {
        let (kind, style) = if let Some(kind) = arg.strip_suffix("-only") {
            (kind, EditStyle::DelimitersOnly)
        } else if let Some(kind) = arg.strip_suffix("-inside") {
            (kind, EditStyle::Inside)
        } else {
            (arg, EditStyle::Whole)
        };

        let (open, close) = match kind {
            "parens" => (b'(', b')'),
            "curly" => (b'{', b'}'),
            "square" => (b'[', b']'),
            "angles" => (b'<', b'>'),
            _ => bail!("unknown balanced sub-mode `{arg}`"),
        };

        Ok(BalancedPass {
            arg: arg.to_owned(),
            open,
            close,
            style,
        })
    }

    /// Balanced pairs in `data` as (open, close) byte offsets, ordered by
    /// the position of the opening delimiter. Unmatched delimiters are not
    /// pairs and are skipped over.
    fn find_pairs(&self, data: &[u8]) -> Vec<(usize, usize)> {
        let mut stack = Vec::new();
        let mut pairs = Vec::new();

        for (i, &b) in data.iter().enumerate() {
            if b == self.open {
                stack.push(i);
            } else if b == self.close {
                if let Some(start) = stack.pop() {
                    pairs.push((start, i));
                }
            }
        }

        pairs.sort_unstable_by_key(|pair| pair.0);
        pairs
    }

    fn apply_edit(&self, data: &[u8], open: usize, close: usize) -> Vec<u8> {
        let mut edited = Vec::with_capacity(data.len());
        match self.style {
            EditStyle::Whole => {
                edited.extend_from_slice(&data[..open]);
                edited.extend_from_slice(&data[close + 1..]);
            }
            EditStyle::DelimitersOnly => {
                edited.extend_from_slice(&data[..open]);
                edited.extend_from_slice(&data[open + 1..close]);
                edited.extend_from_slice(&data[close + 1..]);
            }
            EditStyle::Inside => {
                edited.extend_from_slice(&data[..=open]);
                edited.extend_from_slice(&data[close..]);
            }
        }
        edited
    }
}

impl Pass for BalancedPass {
    fn name(&self) -> &str {
        "balanced"
    }

    fn arg(&self) -> &str {
        &self.arg
    }

    fn new(&self, _test_case: &Path) -> Result<Option<Box<dyn PassState>>> {
        Ok(Some(Box::new(BalancedState { index: 0 })))
    }

    fn advance(
        &self,
        _test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>> {
        let state: BalancedState = downcast_state(&*state)?;
        Ok(Some(Box::new(BalancedState {
            index: state.index + 1,
        })))
    }

    fn advance_on_success(
        &self,
        _test_case: &Path,
        state: Box<dyn PassState>,
    ) -> Result<Option<Box<dyn PassState>>> {
        let state: BalancedState = downcast_state(&*state)?;
        // An `Inside` edit leaves the emptied pair in the file, so the
        // cursor has to move past it; the other styles consume their pair.
        let index = match self.style {
            EditStyle::Inside => state.index + 1,
            _ => state.index,
        };
        Ok(Some(Box::new(BalancedState { index })))
    }

    fn transform(
        &self,
        test_case: &Path,
        state: Box<dyn PassState>,
        _notifier: &mut ProcessNotifier,
    ) -> Result<(PassOutcome, Box<dyn PassState>)> {
        let current: BalancedState = downcast_state(&*state)?;
        let data = fs::read(test_case)?;

        let pairs = self.find_pairs(&data);
        let Some(&(open, close)) = pairs.get(current.index) else {
            return Ok((PassOutcome::Stop, state));
        };

        fs::write(test_case, self.apply_edit(&data, open, close))?;
        Ok((PassOutcome::Ok, state))
    }

    fn load_state(&self, value: serde_json::Value) -> Result<Box<dyn PassState>> {
        Ok(Box::new(serde_json::from_value::<BalancedState>(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn write_temp(content: &str) -> NamedTempFile {
        let f = NamedTempFile::new().unwrap();
        fs::write(f.path(), content).unwrap();
        f
    }

    fn transform_once(
        pass: &BalancedPass,
        path: &Path,
        state: Box<dyn PassState>,
    ) -> (PassOutcome, Box<dyn PassState>) {
        pass.transform(path, state, &mut ProcessNotifier::disabled())
            .unwrap()
    }

    fn read(f: &NamedTempFile) -> String {
        fs::read_to_string(f.path()).unwrap()
    }

    #[test]
    fn parens_no_match() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("This is a simple test!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let (result, _) = transform_once(&pass, f.path(), state);

        assert_eq!(result, PassOutcome::Stop);
        assert_eq!(read(&f), "This is a simple test!\n");
    }

    #[test]
    fn parens_simple() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("This is a (simple) test!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This is a  test!\n");
    }

    #[test]
    fn parens_nested_outer() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("This (is a (simple) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This !\n");
    }

    #[test]
    fn parens_nested_inner_after_failed_attempt() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("This (is a (simple) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let state = pass.advance(f.path(), state).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This (is a  test)!\n");
    }

    #[test]
    fn parens_only_simple() {
        let pass = BalancedPass::new("parens-only").unwrap();
        let f = write_temp("This is a (simple) test!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This is a simple test!\n");
    }

    #[test]
    fn parens_only_nested_outer_then_inner() {
        let pass = BalancedPass::new("parens-only").unwrap();
        let f = write_temp("This (is a (simple) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let (_, state) = transform_once(&pass, f.path(), state);
        assert_eq!(read(&f), "This is a (simple) test!\n");

        let state = pass.advance_on_success(f.path(), state).unwrap().unwrap();
        transform_once(&pass, f.path(), state);
        assert_eq!(read(&f), "This is a simple test!\n");
    }

    #[test]
    fn parens_only_converges_in_five_commits() {
        let pass = BalancedPass::new("parens-only").unwrap();
        let f = write_temp("(This) (is a (((more)) complex) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let (mut result, mut state) = transform_once(&pass, f.path(), state);

        let mut iterations = 0;
        while result == PassOutcome::Ok && iterations < 7 {
            let next = pass.advance_on_success(f.path(), state).unwrap().unwrap();
            (result, state) = transform_once(&pass, f.path(), next);
            iterations += 1;
        }

        assert_eq!(iterations, 5);
        assert_eq!(read(&f), "This is a more complex test!\n");
    }

    #[test]
    fn parens_only_exhausts_after_five_failed_attempts() {
        let pass = BalancedPass::new("parens-only").unwrap();
        let content = "(This) (is a (((more)) complex) test)!\n";
        let f = write_temp(content);

        let state = pass.new(f.path()).unwrap().unwrap();
        let (mut result, mut state) = transform_once(&pass, f.path(), state);

        let mut iterations = 0;
        while result == PassOutcome::Ok && iterations < 7 {
            // Pretend every attempt was rejected: restore the file and
            // advance on the failure side.
            fs::write(f.path(), content).unwrap();
            let next = pass.advance(f.path(), state).unwrap().unwrap();
            (result, state) = transform_once(&pass, f.path(), next);
            iterations += 1;
        }

        assert_eq!(iterations, 5);
    }

    #[test]
    fn parens_inside_simple() {
        let pass = BalancedPass::new("parens-inside").unwrap();
        let f = write_temp("This is a (simple) test!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This is a () test!\n");
    }

    #[test]
    fn parens_inside_nested_outer() {
        let pass = BalancedPass::new("parens-inside").unwrap();
        let f = write_temp("This (is a (simple) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "This ()!\n");
    }

    #[test]
    fn parens_inside_steps_past_the_emptied_pair() {
        let pass = BalancedPass::new("parens-inside").unwrap();
        let f = write_temp("(This) (is a (((more)) complex) test)!\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let (mut result, mut state) = transform_once(&pass, f.path(), state);

        let mut iterations = 0;
        while result == PassOutcome::Ok && iterations < 4 {
            let next = pass.advance_on_success(f.path(), state).unwrap().unwrap();
            (result, state) = transform_once(&pass, f.path(), next);
            iterations += 1;
        }

        assert_eq!(iterations, 2);
        assert_eq!(read(&f), "() ()!\n");
    }

    #[test]
    fn curly_whole_pair() {
        let pass = BalancedPass::new("curly").unwrap();
        let f = write_temp("int f() { return 0; }\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        transform_once(&pass, f.path(), state);

        assert_eq!(read(&f), "int f() \n");
    }

    #[test]
    fn unmatched_delimiters_are_not_pairs() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("a ( b ( c )\n");

        // Only the inner `( c )` is balanced.
        let state = pass.new(f.path()).unwrap().unwrap();
        let (result, _) = transform_once(&pass, f.path(), state);

        assert_eq!(result, PassOutcome::Ok);
        assert_eq!(read(&f), "a ( b \n");
    }

    #[test]
    fn states_survive_the_wire_format() {
        let pass = BalancedPass::new("parens").unwrap();
        let f = write_temp("x\n");

        let state = pass.new(f.path()).unwrap().unwrap();
        let state = pass.advance(f.path(), state).unwrap().unwrap();
        let restored = pass.load_state(state.save().unwrap()).unwrap();
        let restored: BalancedState = downcast_state(&*restored).unwrap();
        assert_eq!(restored.index, 1);
    }
}
