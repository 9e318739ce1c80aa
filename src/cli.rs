// ============================================================================
// paintfe-transform CLI: headless transforms via command-line arguments
// ============================================================================
//
// Usage examples:
//   paintfe-transform -i photo.png --rotate 30 -o rotated.png
//   paintfe-transform -i photo.png --scale 0.5 --clip crop -o half.png
//   paintfe-transform -i *.jpg --shear 0.2,0 --output-dir sheared/ --format png
//   paintfe-transform -i card.png --family perspective \
//       --perspective 10,0,90,5,0,100,100,95 -o card_fixed.png
//
// Each image becomes a single layer. A transform session is built over it,
// the requested operations are applied about the pivot, and the result is
// rendered through the preview graph at view scale 1.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::canvas::CanvasLayer;
use crate::components::families::TransformFamily;
use crate::components::tools::{GridSession, TransformGridOptions};
use crate::components::transform_grid::GridRect;
use crate::compositor::PreviewGraph;
use crate::error::TransformError;
use crate::ops::boundary::ResizePolicy;
use crate::ops::matrix::{Matrix3, Vector2};
use crate::ops::transform::{Interpolation, TransformDirection};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// PaintFE headless transform tool.
#[derive(Parser, Debug)]
#[command(
    name = "paintfe-transform",
    about = "Rotate, scale, shear and perspective-correct images without the GUI",
    long_about = "Apply transform-grid operations to image files and write the result.\n\
                  Operations are applied about the pivot in the order scale, shear,\n\
                  rotate, after any --perspective target quad.\n\n\
                  Example:\n  \
                  paintfe-transform -i photo.png --rotate 30 -o rotated.png\n  \
                  paintfe-transform -i *.jpg --scale 0.5 --output-dir out/ --format png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga, ico, tiff.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// Transform family: unified, perspective, rotate, generic, handle.
    #[arg(long, default_value = "unified")]
    pub family: String,

    /// Rotation in degrees, clockwise on screen.
    #[arg(short, long, allow_negative_numbers = true, value_name = "DEGREES")]
    pub rotate: Option<f64>,

    /// Scale factor, "S" or "SX,SY".
    #[arg(short, long, allow_hyphen_values = true, value_name = "SX[,SY]")]
    pub scale: Option<String>,

    /// Shear amounts, "X" or "X,Y".
    #[arg(long, allow_hyphen_values = true, value_name = "X[,Y]")]
    pub shear: Option<String>,

    /// Target corners "x0,y0,x1,y1,x2,y2,x3,y3" (top-left, top-right,
    /// bottom-left, bottom-right).
    #[arg(long, allow_hyphen_values = true, value_name = "QUAD")]
    pub perspective: Option<String>,

    /// Pivot "X,Y" in image coordinates. Defaults to the image centre.
    #[arg(long, allow_hyphen_values = true, value_name = "X,Y")]
    pub pivot: Option<String>,

    /// Result clipping: adjust, clip, crop, crop-aspect.
    #[arg(long, default_value = "adjust")]
    pub clip: String,

    /// Resampling: nearest, bilinear, bicubic.
    #[arg(long, default_value = "bilinear")]
    pub interpolation: String,

    /// forward, or backward for corrective transforms.
    #[arg(long, default_value = "forward")]
    pub direction: String,

    /// Print the final matrix and per-file timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Everything `run_one` needs besides the paths, parsed once up front.
#[derive(Clone, Debug)]
struct Plan {
    family: TransformFamily,
    options: TransformGridOptions,
    pivot: Option<Vector2>,
    perspective: Option<[Vector2; 4]>,
    scale: (f64, f64),
    shear: (f64, f64),
    rotate: f64,
}

impl Plan {
    fn from_args(args: &CliArgs) -> Result<Self, String> {
        let family = parse_family(&args.family)?;
        let options = TransformGridOptions {
            clip: parse_clip(&args.clip)?,
            interpolation: parse_interpolation(&args.interpolation)?,
            direction: parse_direction(&args.direction)?,
            ..TransformGridOptions::default()
        };

        let pivot = match &args.pivot {
            Some(s) => {
                let v = parse_numbers(s, &[2], "--pivot")?;
                Some(Vector2::new(v[0], v[1]))
            }
            None => None,
        };
        let perspective = match &args.perspective {
            Some(s) => {
                let v = parse_numbers(s, &[8], "--perspective")?;
                Some([
                    Vector2::new(v[0], v[1]),
                    Vector2::new(v[2], v[3]),
                    Vector2::new(v[4], v[5]),
                    Vector2::new(v[6], v[7]),
                ])
            }
            None => None,
        };
        let scale = match &args.scale {
            Some(s) => {
                let v = parse_numbers(s, &[1, 2], "--scale")?;
                let (sx, sy) = (v[0], *v.get(1).unwrap_or(&v[0]));
                if sx == 0.0 || sy == 0.0 {
                    return Err("--scale must not be zero".to_string());
                }
                (sx, sy)
            }
            None => (1.0, 1.0),
        };
        let shear = match &args.shear {
            Some(s) => {
                let v = parse_numbers(s, &[1, 2], "--shear")?;
                (v[0], *v.get(1).unwrap_or(&0.0))
            }
            None => (0.0, 0.0),
        };
        let rotate = args.rotate.unwrap_or(0.0);
        if !rotate.is_finite() {
            return Err("--rotate must be a finite number".to_string());
        }

        if family == TransformFamily::Rotate
            && (args.scale.is_some() || args.shear.is_some() || args.perspective.is_some())
        {
            return Err("--family rotate only takes --rotate and --pivot".to_string());
        }
        if pivot.is_some() && !matches!(family, TransformFamily::Unified | TransformFamily::Rotate) {
            return Err(format!("--family {} has no pivot", args.family));
        }

        Ok(Self { family, options, pivot, perspective, scale, shear, rotate: rotate.to_radians() })
    }

    /// Scale, shear and rotate about `pivot`, as one matrix.
    fn operation(&self, pivot: Vector2) -> Matrix3 {
        let mut m = Matrix3::IDENTITY;
        m.translate(-pivot.x, -pivot.y);
        m.scale(self.scale.0, self.scale.1);
        m.xshear(self.shear.0);
        m.yshear(self.shear.1);
        m.rotate(self.rotate);
        m.translate(pivot.x, pivot.y);
        m
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let plan = match Plan::from_args(&args) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.output.is_none() && args.output_dir.is_none() {
        eprintln!("error: one of --output or --output-dir is required.");
        return ExitCode::FAILURE;
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let format = parse_format(args.format.as_deref(), args.output.as_deref());

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), TransformError::from(e));
        return ExitCode::FAILURE;
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) =
            build_output_path(input_path, args.output.as_deref(), args.output_dir.as_deref(), format)
        else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &plan, format, args.verbose) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                crate::log_err!("CLI: {}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, output: &Path, plan: &Plan, format: ImageFormat, verbose: bool) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    let pixels = image::open(input)
        .map_err(|e| format!("load failed: {}", TransformError::from(e)))?
        .into_rgba8();
    let name = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let layer = CanvasLayer::new(name, pixels, (0, 0));

    // -- Step 2: Transform -----------------------------------------------
    let (result, matrix) = transform_layer(&layer, plan)?;
    if verbose {
        for row in matrix.coeff {
            println!("  [{:>10.4} {:>10.4} {:>10.4}]", row[0], row[1], row[2]);
        }
    }

    // -- Step 3: Save ----------------------------------------------------
    save(result, output, format)
}

/// Run `plan` over `layer` and render the outcome. Returns the pixels and
/// the matrix they were rendered with.
fn transform_layer(layer: &CanvasLayer, plan: &Plan) -> Result<(RgbaImage, Matrix3), String> {
    use crate::canvas::Drawable;

    let rect = GridRect::from(layer.bounds());
    let mut session =
        GridSession::new(plan.family, rect, plan.options.clone()).map_err(|e| e.to_string())?;

    if let Some(p) = plan.pivot
        && !session.set_pivot(p)
    {
        return Err(format!("pivot ({}, {}) rejected", p.x, p.y));
    }

    if let Some(quad) = plan.perspective {
        let m = rect.matrix_to_quad(&quad);
        if !session.impose_matrix(&m) {
            return Err("perspective quad is degenerate".to_string());
        }
    }

    let op = plan.operation(session.pivot());
    if !op.is_identity() && !session.apply(&op) {
        return Err("transform is degenerate".to_string());
    }

    let params = session
        .preview_params()
        .ok_or_else(|| "transform is invalid (the result would fold over)".to_string())?;
    let matrix = session.commit().ok_or_else(|| "transform is invalid".to_string())?;

    let mut graph = PreviewGraph::new();
    graph.sync(layer, None, &params);
    let bounds = graph
        .screen_bounds()
        .ok_or_else(|| TransformError::EmptyRenderRegion.to_string())?;
    let frame = graph
        .render(bounds)
        .ok_or_else(|| TransformError::EmptyRenderRegion.to_string())?;
    Ok((frame.pixels, matrix))
}

fn save(pixels: RgbaImage, output: &Path, format: ImageFormat) -> Result<(), String> {
    let img = DynamicImage::ImageRgba8(pixels);
    // No alpha channel in these encoders.
    let img = match format {
        ImageFormat::Jpeg | ImageFormat::Bmp => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };
    img.save_with_format(output, format)
        .map_err(|e| format!("save failed: {}", TransformError::from(e)))
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn format_from_name(name: &str) -> Option<ImageFormat> {
    Some(match name.to_lowercase().as_str() {
        "png" => ImageFormat::Png,
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        "webp" => ImageFormat::WebP,
        "bmp" => ImageFormat::Bmp,
        "tga" => ImageFormat::Tga,
        "ico" => ImageFormat::Ico,
        "tiff" | "tif" => ImageFormat::Tiff,
        _ => return None,
    })
}

/// Choose the format from the `--format` string or infer it from the
/// output file extension. Defaults to PNG when neither is known.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> ImageFormat {
    if let Some(f) = format_arg.and_then(format_from_name) {
        return f;
    }
    output
        .and_then(|o| o.extension())
        .and_then(|e| e.to_str())
        .and_then(format_from_name)
        .unwrap_or(ImageFormat::Png)
}

fn extension(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("png")
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: ImageFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy().into_owned();
    output_dir.map(|dir| dir.join(format!("{}.{}", stem, extension(format))))
}

/// Comma-separated numbers; the count must be one of `counts`.
fn parse_numbers(s: &str, counts: &[usize], flag: &str) -> Result<Vec<f64>, String> {
    let values = s
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|e| format!("{}: {}", flag, e))?;
    if !counts.contains(&values.len()) {
        return Err(format!("{}: expected {:?} values, got {}", flag, counts, values.len()));
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(format!("{}: values must be finite", flag));
    }
    Ok(values)
}

fn parse_family(s: &str) -> Result<TransformFamily, String> {
    match s.to_lowercase().as_str() {
        "unified" => Ok(TransformFamily::Unified),
        "perspective" => Ok(TransformFamily::Perspective),
        "rotate" => Ok(TransformFamily::Rotate),
        "generic" => Ok(TransformFamily::Generic),
        "handle" => Ok(TransformFamily::Handle),
        other => Err(format!("unknown family '{}'", other)),
    }
}

fn parse_clip(s: &str) -> Result<ResizePolicy, String> {
    match s.to_lowercase().as_str() {
        "adjust" => Ok(ResizePolicy::Adjust),
        "clip" => Ok(ResizePolicy::Clip),
        "crop" => Ok(ResizePolicy::Crop),
        "crop-aspect" | "crop_aspect" => Ok(ResizePolicy::CropWithAspect),
        other => Err(format!("unknown clip mode '{}'", other)),
    }
}

fn parse_interpolation(s: &str) -> Result<Interpolation, String> {
    match s.to_lowercase().as_str() {
        "nearest" | "none" => Ok(Interpolation::Nearest),
        "bilinear" | "linear" => Ok(Interpolation::Bilinear),
        "bicubic" | "cubic" => Ok(Interpolation::Bicubic),
        other => Err(format!("unknown interpolation '{}'", other)),
    }
}

fn parse_direction(s: &str) -> Result<TransformDirection, String> {
    match s.to_lowercase().as_str() {
        "forward" | "normal" => Ok(TransformDirection::Forward),
        "backward" | "corrective" => Ok(TransformDirection::Backward),
        other => Err(format!("unknown direction '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["paintfe-transform", "-i", "in.png", "-o", "out.png"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    fn layer(w: u32, h: u32) -> CanvasLayer {
        CanvasLayer::new("test", RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255])), (0, 0))
    }

    #[test]
    fn parses_operation_flags() {
        let plan = Plan::from_args(&args(&["--rotate", "-90", "--scale", "2,0.5", "--pivot", "-1,3"]))
            .expect("plan");
        assert!((plan.rotate + std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert_eq!(plan.scale, (2.0, 0.5));
        assert_eq!(plan.pivot, Some(Vector2::new(-1.0, 3.0)));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Plan::from_args(&args(&["--scale", "0"])).is_err());
        assert!(Plan::from_args(&args(&["--pivot", "1"])).is_err());
        assert!(Plan::from_args(&args(&["--family", "warp"])).is_err());
        assert!(Plan::from_args(&args(&["--clip", "bogus"])).is_err());
    }

    #[test]
    fn rotate_family_takes_only_rotations() {
        assert!(Plan::from_args(&args(&["--family", "rotate", "--rotate", "30", "--pivot", "5,5"])).is_ok());
        for extra in [["--scale", "2"], ["--shear", "0.5"], ["--perspective", "0,0,1,0,0,1,1,1"]] {
            let mut argv = vec!["--family", "rotate"];
            argv.extend_from_slice(&extra);
            assert!(Plan::from_args(&args(&argv)).is_err(), "{:?}", extra);
        }
    }

    #[test]
    fn pivot_needs_a_family_with_one() {
        for family in ["perspective", "generic", "handle"] {
            assert!(Plan::from_args(&args(&["--family", family, "--pivot", "5,5"])).is_err(), "{}", family);
            assert!(Plan::from_args(&args(&["--family", family])).is_ok(), "{}", family);
        }
    }

    #[test]
    fn handle_family_applies_operations() {
        let plan = Plan::from_args(&args(&["--family", "handle", "--scale", "2"])).expect("plan");
        let (pixels, matrix) = transform_layer(&layer(10, 10), &plan).expect("transform");
        assert_eq!(pixels.dimensions(), (20, 20));
        assert!(matrix.transform_vector2(Vector2::new(5.0, 5.0)).distance(Vector2::new(5.0, 5.0)) < 1e-9);
    }

    #[test]
    fn operation_keeps_pivot_fixed() {
        let plan = Plan::from_args(&args(&["--rotate", "45", "--scale", "3"])).expect("plan");
        let m = plan.operation(Vector2::new(10.0, 20.0));
        assert!(m.transform_vector2(Vector2::new(10.0, 20.0)).distance(Vector2::new(10.0, 20.0)) < 1e-9);
    }

    #[test]
    fn quarter_turn_swaps_dimensions() {
        let plan = Plan::from_args(&args(&["--rotate", "90", "--interpolation", "nearest"])).expect("plan");
        let (pixels, _) = transform_layer(&layer(4, 10), &plan).expect("render");
        assert_eq!(pixels.dimensions(), (10, 4));
        assert!(pixels.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn clip_keeps_source_size() {
        let plan = Plan::from_args(&args(&["--rotate", "30", "--clip", "clip"])).expect("plan");
        let (pixels, _) = transform_layer(&layer(20, 10), &plan).expect("render");
        assert_eq!(pixels.dimensions(), (20, 10));
    }

    #[test]
    fn perspective_quad_sets_output_bounds() {
        let plan = Plan::from_args(&args(&[
            "--family", "perspective", "--perspective", "0,0,40,0,0,20,40,20",
        ]))
        .expect("plan");
        let (pixels, m) = transform_layer(&layer(20, 10), &plan).expect("render");
        assert_eq!(pixels.dimensions(), (40, 20));
        assert!(m.transform_vector2(Vector2::new(20.0, 10.0)).distance(Vector2::new(40.0, 20.0)) < 1e-6);
    }

    #[test]
    fn folded_quad_fails() {
        let plan = Plan::from_args(&args(&[
            "--family", "perspective", "--perspective", "0,0,40,0,40,20,0,20",
        ]))
        .expect("plan");
        assert!(transform_layer(&layer(20, 10), &plan).is_err());
    }

    #[test]
    fn format_and_output_path() {
        assert_eq!(parse_format(Some("JPG"), None), ImageFormat::Jpeg);
        assert_eq!(parse_format(None, Some(Path::new("a/b.webp"))), ImageFormat::WebP);
        assert_eq!(parse_format(None, None), ImageFormat::Png);

        let p = build_output_path(Path::new("shots/cat.jpg"), None, Some(Path::new("out")), ImageFormat::Png);
        assert_eq!(p, Some(PathBuf::from("out/cat.png")));
        let p = build_output_path(Path::new("cat.jpg"), Some(Path::new("x.png")), None, ImageFormat::Png);
        assert_eq!(p, Some(PathBuf::from("x.png")));
        assert!(build_output_path(Path::new("cat.jpg"), None, None, ImageFormat::Png).is_none());
    }
}
