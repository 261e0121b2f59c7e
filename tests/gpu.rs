//! Tests that need a display and a GPU with ray tracing support. They run on the main thread
//! without the default test harness, since the window system insists on owning that thread.

use std::{path::Path, process::ExitCode, thread, time::Duration};

use ultraviolet::Vec3;
use winit::event_loop::EventLoop;

use sphere_tracer::{
    render::{
        frame_pacer::{FramePacer, FrameRoute, SlotState},
        shader_types::FrameUniform,
    },
    Capture, Primitive, RenderCallInfo, Renderer, RendererError, RendererSettings, Scene,
};

const TOTAL_CALLS: u32 = 4;
const TOTAL_SAMPLES: u32 = 400;

enum Outcome {
    Passed(EventLoop<()>),
    Skipped(String),
}

fn main() -> ExitCode {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .is_test(true)
        .try_init();

    let settings = RendererSettings {
        window_width: 64,
        window_height: 64,
        ..Default::default()
    };
    if !Path::new(&settings.shader_directory)
        .join("raygen.rgen.spv")
        .exists()
    {
        println!("gpu tests skipped: no compiled shaders in {:?}", settings.shader_directory);
        return ExitCode::SUCCESS;
    }

    let event_loop = match std::panic::catch_unwind(EventLoop::new) {
        Ok(event_loop) => event_loop,
        Err(_) => {
            println!("gpu tests skipped: no display available");
            return ExitCode::SUCCESS;
        }
    };

    let (event_loop, progressive) = match end_to_end(event_loop, &settings) {
        Ok((Outcome::Passed(event_loop), capture)) => {
            println!("test end_to_end ... ok");
            (event_loop, capture)
        }
        Ok((Outcome::Skipped(reason), _)) => {
            println!("gpu tests skipped: {reason}");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            println!("test end_to_end ... FAILED: {err}");
            return ExitCode::FAILURE;
        }
    };

    let event_loop = match reconstruct_and_trace_at_once(event_loop, &settings, &progressive) {
        Ok(event_loop) => {
            println!("test reconstruct_and_trace_at_once ... ok");
            event_loop
        }
        Err(err) => {
            println!("test reconstruct_and_trace_at_once ... FAILED: {err}");
            return ExitCode::FAILURE;
        }
    };

    match minimized_window_keeps_tracing(event_loop, &settings) {
        Ok(Outcome::Passed(_)) => println!("test minimized_window_keeps_tracing ... ok"),
        Ok(Outcome::Skipped(reason)) => {
            println!("test minimized_window_keeps_tracing ... skipped: {reason}")
        }
        Err(err) => {
            println!("test minimized_window_keeps_tracing ... FAILED: {err}");
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}

fn two_sphere_scene() -> Scene {
    let primitives = vec![
        Primitive::sphere(Vec3::new(-1.5, 1.0, 0.0), 1.0).diffuse(Vec3::new(0.4, 0.2, 0.1)),
        Primitive::sphere(Vec3::new(1.5, 1.0, 0.0), 1.0).metal(Vec3::new(0.7, 0.6, 0.5), 0.1),
    ];
    Scene::try_from(primitives).expect("two spheres fit into a scene")
}

/// Construction failures that mean the machine cannot run these tests at all.
fn unsupported(err: &RendererError) -> bool {
    matches!(
        err,
        RendererError::Loading(_)
            | RendererError::NoCompatibleDevice { .. }
            | RendererError::Window(_)
    )
}

fn end_to_end(
    event_loop: EventLoop<()>,
    settings: &RendererSettings,
) -> Result<(Outcome, Option<Capture>), String> {
    let mut renderer = match Renderer::with_event_loop(event_loop, settings, &two_sphere_scene()) {
        Ok(renderer) => renderer,
        Err(err) if unsupported(&err) => return Ok((Outcome::Skipped(err.to_string()), None)),
        Err(err) => return Err(format!("construction failed: {err}")),
    };

    for info in RenderCallInfo::plan(TOTAL_CALLS, TOTAL_SAMPLES) {
        renderer.update();
        renderer
            .render(&info)
            .map_err(|err| format!("render call {} failed: {err}", info.number))?;
    }

    let uniform = renderer
        .last_frame_uniform()
        .ok_or("no frame uniform after rendering")?;
    let expected = FrameUniform {
        samples_before: 300,
        samples_so_far: TOTAL_SAMPLES,
        number: TOTAL_CALLS,
        total_samples: TOTAL_SAMPLES,
    };
    if uniform != expected {
        return Err(format!("last frame uniform was {uniform:?}"));
    }

    let capture = renderer.capture().map_err(|err| err.to_string())?;
    if capture.samples_so_far != TOTAL_SAMPLES {
        return Err(format!("capture reports {} samples", capture.samples_so_far));
    }
    let error = capture.max_round_trip_error();
    if error > 0.5 / 255.0 + 1e-4 {
        return Err(format!("render target differs from sum / samples by {error}"));
    }
    if capture.accumulation.iter().all(|sum| sum[..3] == [0.0; 3]) {
        return Err("nothing was accumulated".to_string());
    }

    let event_loop = renderer
        .into_event_loop()
        .ok_or("renderer did not hand back its event loop")?;
    Ok((Outcome::Passed(event_loop), Some(capture)))
}

/// A second renderer with the same parameters must come up after the first one was destroyed,
/// and tracing every sample in a single call has to give the same image.
fn reconstruct_and_trace_at_once(
    event_loop: EventLoop<()>,
    settings: &RendererSettings,
    progressive: &Option<Capture>,
) -> Result<EventLoop<()>, String> {
    let mut renderer = Renderer::with_event_loop(event_loop, settings, &two_sphere_scene())
        .map_err(|err| format!("second construction failed: {err}"))?;

    renderer.update();
    renderer
        .render(&RenderCallInfo::new(1, 1, TOTAL_SAMPLES))
        .map_err(|err| format!("render failed: {err}"))?;
    let at_once = renderer.capture().map_err(|err| err.to_string())?;

    let progressive = progressive.as_ref().ok_or("no capture of the progressive run")?;
    if (at_once.width, at_once.height) != (progressive.width, progressive.height) {
        return Err("image sizes differ between runs".to_string());
    }
    for (x, y) in (0..at_once.height).flat_map(|y| (0..at_once.width).map(move |x| (x, y))) {
        let a = at_once.averaged_pixel(x, y);
        let b = progressive.averaged_pixel(x, y);
        if (0..3).any(|channel| (a[channel] - b[channel]).abs() > 1e-3) {
            return Err(format!("pixel ({x}, {y}) differs: {a:?} vs {b:?}"));
        }
    }

    renderer
        .into_event_loop()
        .ok_or_else(|| "renderer did not hand back its event loop".to_string())
}

fn pacer_state(pacer: &FramePacer) -> (usize, Vec<SlotState>) {
    let states = (0..pacer.slot_count()).map(|slot| pacer.slot_state(slot)).collect();
    (pacer.in_use_semaphores(), states)
}

/// While the window has no area, render calls keep accumulating samples in slot 0 and leave
/// the swapchain bookkeeping alone.
fn minimized_window_keeps_tracing(
    event_loop: EventLoop<()>,
    settings: &RendererSettings,
) -> Result<Outcome, String> {
    let mut renderer = Renderer::with_event_loop(event_loop, settings, &two_sphere_scene())
        .map_err(|err| format!("construction failed: {err}"))?;
    if renderer.pacer().slot_count() != renderer.frame_slot_count() {
        return Err("pacer and frame resources disagree on the slot count".to_string());
    }

    let mut plan = RenderCallInfo::plan(TOTAL_CALLS, TOTAL_SAMPLES);
    let first = plan.next().ok_or("empty render plan")?;
    renderer.update();
    if renderer.route() != FrameRoute::Present {
        return Ok(Outcome::Skipped("window started without an area".to_string()));
    }
    renderer
        .render(&first)
        .map_err(|err| format!("visible render call failed: {err}"))?;
    let before = pacer_state(renderer.pacer());

    renderer.window().set_minimized(true);
    for _ in 0..50 {
        renderer.update();
        if renderer.route() == FrameRoute::Offscreen {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    if renderer.route() != FrameRoute::Offscreen {
        return Ok(Outcome::Skipped(
            "the window system never reported a zero size".to_string(),
        ));
    }

    for info in plan {
        renderer
            .render(&info)
            .map_err(|err| format!("offscreen render call {} failed: {err}", info.number))?;
        let samples = renderer
            .last_frame_uniform()
            .ok_or("no frame uniform after rendering")?
            .samples_so_far;
        if samples != info.samples_so_far() {
            return Err(format!(
                "call {} reports {samples} samples instead of {}",
                info.number,
                info.samples_so_far()
            ));
        }
        if pacer_state(renderer.pacer()) != before {
            return Err(format!("offscreen call {} touched the frame pacer", info.number));
        }
    }

    let capture = renderer.capture().map_err(|err| err.to_string())?;
    if capture.samples_so_far != TOTAL_SAMPLES {
        return Err(format!("capture reports {} samples", capture.samples_so_far));
    }

    renderer.window().set_minimized(false);
    let event_loop = renderer
        .into_event_loop()
        .ok_or("renderer did not hand back its event loop")?;
    Ok(Outcome::Passed(event_loop))
}
