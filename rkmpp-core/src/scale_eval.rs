// SCALE_EVAL - Output size expressions for the scale filter
//
// Width/height are arithmetic expressions over the input geometry:
//   iw/in_w, ih/in_h     input size
//   ow/out_w, oh/out_h   the other output dimension (once known)
//   a, sar, dar          input aspect ratios
//   hsub/vsub            input chroma subsampling, ohsub/ovsub for the output
// Functions: min, max, floor, ceil, round, trunc, abs, sqrt.
//
// A result of 0 keeps the input dimension. A negative result -n asks for the
// input aspect ratio, rounded to a multiple of n (n = 1 means no rounding).

use crate::config::AspectRatioPolicy;
use crate::error::{Result, RkError};
use crate::format::PixelFormat;
use crate::frame::Rational;

#[derive(Debug, Clone, Copy)]
pub struct ScaleVars {
    pub in_w: f64,
    pub in_h: f64,
    pub out_w: f64,
    pub out_h: f64,
    pub sar: f64,
    pub hsub: f64,
    pub vsub: f64,
    pub ohsub: f64,
    pub ovsub: f64,
}

impl ScaleVars {
    pub fn new(in_w: u32, in_h: u32, sar: Rational, in_format: PixelFormat, out_format: PixelFormat) -> Self {
        let (ihs, ivs) = in_format.chroma_shift();
        let (ohs, ovs) = out_format.chroma_shift();
        Self {
            in_w: in_w as f64,
            in_h: in_h as f64,
            out_w: f64::NAN,
            out_h: f64::NAN,
            sar: if sar.num != 0 { sar.as_f64() } else { 1.0 },
            hsub: (1u32 << ihs) as f64,
            vsub: (1u32 << ivs) as f64,
            ohsub: (1u32 << ohs) as f64,
            ovsub: (1u32 << ovs) as f64,
        }
    }

    fn lookup(&self, name: &str) -> Option<f64> {
        let v = match name {
            "iw" | "in_w" => self.in_w,
            "ih" | "in_h" => self.in_h,
            "ow" | "out_w" => self.out_w,
            "oh" | "out_h" => self.out_h,
            "a" => self.in_w / self.in_h,
            "sar" => self.sar,
            "dar" => self.in_w / self.in_h * self.sar,
            "hsub" => self.hsub,
            "vsub" => self.vsub,
            "ohsub" => self.ohsub,
            "ovsub" => self.ovsub,
            _ => return None,
        };
        Some(v)
    }
}

// ============================================================================
// Expression parser
// ============================================================================

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    vars: &'a ScaleVars,
}

impl<'a> Parser<'a> {
    fn error(&self, what: &str) -> RkError {
        RkError::Config(format!(
            "{} at offset {} in '{}'",
            what,
            self.pos,
            String::from_utf8_lossy(self.src)
        ))
    }

    fn skip_ws(&mut self) {
        while self.pos < self.src.len() && self.src[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat(b'+') {
                value += self.term()?;
            } else if self.eat(b'-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.power()?;
        loop {
            if self.eat(b'*') {
                value *= self.power()?;
            } else if self.eat(b'/') {
                value /= self.power()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn power(&mut self) -> Result<f64> {
        let base = self.unary()?;
        if self.eat(b'^') {
            return Ok(base.powf(self.power()?));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64> {
        if self.eat(b'-') {
            return Ok(-self.unary()?);
        }
        if self.eat(b'+') {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let v = self.expr()?;
                if !self.eat(b')') {
                    return Err(self.error("missing ')'"));
                }
                Ok(v)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let name = self.ident();
                if self.eat(b'(') {
                    self.call(&name)
                } else {
                    self.vars.lookup(&name).ok_or_else(|| self.error(&format!("unknown variable '{}'", name)))
                }
            }
            _ => Err(self.error("expected a value")),
        }
    }

    fn number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self.pos < self.src.len() && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.') {
            self.pos += 1;
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| self.error("malformed number"))
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self.pos < self.src.len() && (self.src[self.pos].is_ascii_alphanumeric() || self.src[self.pos] == b'_') {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn call(&mut self, name: &str) -> Result<f64> {
        let mut args = vec![self.expr()?];
        while self.eat(b',') {
            args.push(self.expr()?);
        }
        if !self.eat(b')') {
            return Err(self.error("missing ')'"));
        }
        let arity = |n: usize| -> Result<()> {
            if args.len() == n {
                Ok(())
            } else {
                Err(RkError::Config(format!("{}() takes {} argument(s)", name, n)))
            }
        };
        match name {
            "min" => {
                arity(2)?;
                Ok(args[0].min(args[1]))
            }
            "max" => {
                arity(2)?;
                Ok(args[0].max(args[1]))
            }
            "floor" | "ceil" | "round" | "trunc" | "abs" | "sqrt" => {
                arity(1)?;
                let x = args[0];
                Ok(match name {
                    "floor" => x.floor(),
                    "ceil" => x.ceil(),
                    "round" => x.round(),
                    "trunc" => x.trunc(),
                    "abs" => x.abs(),
                    _ => x.sqrt(),
                })
            }
            _ => Err(RkError::Config(format!("unknown function '{}'", name))),
        }
    }
}

pub fn eval_expr(expr: &str, vars: &ScaleVars) -> Result<f64> {
    let mut parser = Parser { src: expr.as_bytes(), pos: 0, vars };
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

// ============================================================================
// Dimensions
// ============================================================================

/// Evaluate the width/height expressions. Width is tried first without `oh`,
/// then height with the resulting `ow`, then width again with `oh` known, so
/// either expression may refer to the other.
pub fn eval_dimensions(w_expr: &str, h_expr: &str, vars: &ScaleVars) -> Result<(i64, i64)> {
    let mut vars = *vars;
    let pick = |res: f64, input: f64| -> i64 {
        let v = res as i64;
        if v == 0 { input as i64 } else { v }
    };

    // first pass may legitimately fail if it needs oh
    if let Ok(w) = eval_expr(w_expr, &vars) {
        vars.out_w = pick(w, vars.in_w) as f64;
    }
    let h = eval_expr(h_expr, &vars)?;
    if h.is_nan() {
        return Err(RkError::Config(format!("height expression '{}' is not a number", h_expr)));
    }
    vars.out_h = pick(h, vars.in_h) as f64;

    let w = eval_expr(w_expr, &vars)?;
    if w.is_nan() {
        return Err(RkError::Config(format!("width expression '{}' is not a number", w_expr)));
    }
    Ok((pick(w, vars.in_w), vars.out_h as i64))
}

/// a * b / c rounded to nearest
fn rescale(a: i128, b: i128, c: i128) -> i128 {
    if c == 0 {
        return 0;
    }
    (a * b + c / 2) / c
}

/// Resolve negative requests and apply the aspect ratio policy.
///
/// Requests outside the i32 range are rejected up front; the arithmetic
/// below runs in i128 so no intermediate product can overflow.
pub fn adjust_dimensions(
    in_w: u32,
    in_h: u32,
    w: i64,
    h: i64,
    policy: AspectRatioPolicy,
    divisible_by: u32,
) -> Result<(u32, u32)> {
    let i32_range = i32::MIN as i64..=i32::MAX as i64;
    if !i32_range.contains(&w) || !i32_range.contains(&h) {
        return Err(RkError::Config(format!("requested size {}x{} out of range", w, h)));
    }

    let (iw, ih) = (in_w as i128, in_h as i128);
    let (mut w, mut h) = (w as i128, h as i128);

    let factor_w = if w < -1 { -w } else { 1 };
    let factor_h = if h < -1 { -h } else { 1 };

    if w < 0 && h < 0 {
        w = iw;
        h = ih;
    }
    if w < 0 {
        w = rescale(h, iw, ih * factor_w) * factor_w;
    }
    if h < 0 {
        h = rescale(w, ih, iw * factor_h) * factor_h;
    }

    let n = divisible_by.max(1) as i128;
    match policy {
        AspectRatioPolicy::Disable => {}
        AspectRatioPolicy::Decrease => {
            let tmp_w = rescale(h, iw, ih);
            let tmp_h = rescale(w, ih, iw);
            w = w.min(tmp_w);
            h = h.min(tmp_h);
            if n > 1 {
                w = w / n * n;
                h = h / n * n;
            }
        }
        AspectRatioPolicy::Increase => {
            let tmp_w = rescale(h, iw, ih);
            let tmp_h = rescale(w, ih, iw);
            w = w.max(tmp_w);
            h = h.max(tmp_h);
            if n > 1 {
                w = (w + n - 1) / n * n;
                h = (h + n - 1) / n * n;
            }
        }
    }

    if w <= 0 || h <= 0 || w > i32::MAX as i128 || h > i32::MAX as i128 {
        return Err(RkError::Config(format!("rescaled size {}x{} out of range", w, h)));
    }
    Ok((w as u32, h as u32))
}

// ============================================================================
// Size strings
// ============================================================================

const SIZE_ABBREVIATIONS: &[(&str, u32, u32)] = &[
    ("ntsc", 720, 480),
    ("pal", 720, 576),
    ("qntsc", 352, 240),
    ("qpal", 352, 288),
    ("sntsc", 640, 480),
    ("spal", 768, 576),
    ("film", 352, 240),
    ("ntsc-film", 352, 240),
    ("sqcif", 128, 96),
    ("qcif", 176, 144),
    ("cif", 352, 288),
    ("4cif", 704, 576),
    ("16cif", 1408, 1152),
    ("qqvga", 160, 120),
    ("qvga", 320, 240),
    ("vga", 640, 480),
    ("svga", 800, 600),
    ("xga", 1024, 768),
    ("uxga", 1600, 1200),
    ("qxga", 2048, 1536),
    ("sxga", 1280, 1024),
    ("wvga", 852, 480),
    ("wxga", 1366, 768),
    ("wuxga", 1920, 1200),
    ("woxga", 2560, 1600),
    ("cga", 320, 200),
    ("ega", 640, 350),
    ("hd480", 852, 480),
    ("hd720", 1280, 720),
    ("hd1080", 1920, 1080),
    ("2k", 2048, 1080),
    ("2kflat", 1998, 1080),
    ("2kscope", 2048, 858),
    ("4k", 4096, 2160),
    ("4kflat", 3996, 2160),
    ("4kscope", 4096, 1716),
    ("nhd", 640, 360),
    ("hqvga", 240, 160),
    ("wqvga", 400, 240),
    ("fwqvga", 432, 240),
    ("hvga", 480, 320),
    ("qhd", 960, 540),
    ("2kdci", 2048, 1080),
    ("4kdci", 4096, 2160),
    ("uhd2160", 3840, 2160),
    ("uhd4320", 7680, 4320),
];

/// "1280x720" or a named abbreviation
pub fn parse_video_size(s: &str) -> Result<(u32, u32)> {
    let s = s.trim();
    if let Some((_, w, h)) = SIZE_ABBREVIATIONS.iter().find(|(name, _, _)| name.eq_ignore_ascii_case(s)) {
        return Ok((*w, *h));
    }
    let parsed = s
        .split_once(['x', 'X'])
        .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(RkError::Config(format!("invalid frame size '{}'", s))),
    }
}
