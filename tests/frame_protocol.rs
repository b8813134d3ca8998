// Frame protocol tests driven through the headless backend

use ash::vk;
use bytemuck::Zeroable;

use particle_frames::backend::headless::{FixedDrawable, LiveObjects, RecordedWork, Scripted};
use particle_frames::backend::{Gpu, HeadlessGpu, HeadlessProbe, QueueKind};
use particle_frames::frame::SimulationClock;
use particle_frames::particle::{n_body_step, seed_particles};
use particle_frames::{
    ComputeParams, FrameSlot, FrameStage, GpuError, Particle, ParticleRenderer, RendererSettings,
    TickOutcome,
};

fn setup(
    gpu: HeadlessGpu,
    particles: &[Particle],
    drawable: &FixedDrawable,
) -> (ParticleRenderer<HeadlessGpu>, HeadlessProbe) {
    let probe = gpu.probe();
    let renderer = ParticleRenderer::new(gpu, particles, RendererSettings::default(), drawable)
        .expect("renderer setup");
    (renderer, probe)
}

fn slot_state(renderer: &ParticleRenderer<HeadlessGpu>, probe: &HeadlessProbe, slot: usize) -> Vec<Particle> {
    probe.read_particles(renderer.store().buffer(FrameSlot::new(slot)))
}

fn presented_slot(outcome: TickOutcome) -> usize {
    match outcome {
        TickOutcome::Presented { slot, .. } => slot.index(),
        other => panic!("expected a presented tick, got {other:?}"),
    }
}

#[test]
fn slots_alternate_and_images_rotate() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    let slots: Vec<usize> = (0..4)
        .map(|_| presented_slot(renderer.tick(&drawable).unwrap()))
        .collect();

    assert_eq!(slots, vec![0, 1, 0, 1]);
    assert_eq!(probe.presented(), vec![0, 1, 2, 0]);
    assert_eq!(renderer.ticks_presented(), 4);
    assert_eq!(probe.submission_count(QueueKind::Compute), 4);
    assert_eq!(probe.submission_count(QueueKind::Graphics), 4);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn one_tick_updates_only_the_current_slot() {
    let seed = seed_particles(256, 0);
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed, &drawable);

    renderer.tick(&drawable).unwrap();
    let slot0 = slot_state(&renderer, &probe, 0);
    assert_ne!(slot0, seed);
    assert_eq!(slot_state(&renderer, &probe, 1), seed);

    // Slot 0 read slot 1, which still held the seed
    let params = ComputeParams { delta_time: 0.001 };
    let mut expected = vec![Particle::zeroed(); seed.len()];
    for id in 0..seed.len() as u32 {
        n_body_step(id, &params, &seed, &mut expected);
    }
    assert_eq!(slot0, expected);

    renderer.tick(&drawable).unwrap();
    assert_ne!(slot_state(&renderer, &probe, 0), seed);
    assert_ne!(slot_state(&renderer, &probe, 1), seed);
    assert_eq!(slot_state(&renderer, &probe, 0), slot0);
}

#[test]
fn identity_program_keeps_buffers_bit_identical() {
    let seed = seed_particles(512, 7);
    let drawable = FixedDrawable::new(320, 240);
    let gpu = HeadlessGpu::new().with_kernel(|id, _, previous, current| {
        current[id as usize] = previous[id as usize];
    });
    let (mut renderer, probe) = setup(gpu, &seed, &drawable);

    for _ in 0..7 {
        renderer.tick(&drawable).unwrap();
    }

    let seed_bytes: &[u8] = bytemuck::cast_slice(&seed);
    for slot in FrameSlot::all() {
        assert_eq!(probe.read_buffer(renderer.store().buffer(slot)), seed_bytes);
    }
}

#[test]
fn trailing_particles_past_the_last_workgroup_are_not_updated() {
    let seed = seed_particles(300, 0);
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed, &drawable);

    renderer.tick(&drawable).unwrap();

    let dispatched = probe
        .submissions()
        .iter()
        .find_map(|s| match s.work {
            RecordedWork::Compute(pass) => Some(pass.group_count_x),
            RecordedWork::Graphics(_) => None,
        })
        .unwrap();
    assert_eq!(dispatched, 1);

    let slot0 = slot_state(&renderer, &probe, 0);
    for i in 0..256 {
        assert_ne!(slot0[i], seed[i], "particle {i} should have moved");
    }
    assert_eq!(&slot0[256..], &seed[256..]);
}

#[test]
fn out_of_date_acquire_skips_the_tick() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    probe.script_acquire(Scripted::OutOfDate);
    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Skipped);

    assert!(probe.submissions().is_empty());
    assert!(probe.presented().is_empty());
    assert_eq!(renderer.current_frame(), FrameSlot::new(0));
    assert_eq!(renderer.swapchain().rebuild_count(), 1);

    // The retry uses the same slot against the new swapchain
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 0);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn suboptimal_acquire_rebuilds_after_present() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    probe.script_acquire(Scripted::Suboptimal);
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 0);
    assert_eq!(probe.presented(), vec![0]);
    assert_eq!(renderer.swapchain().rebuild_count(), 1);
    assert_eq!(renderer.current_frame(), FrameSlot::new(1));
}

#[test]
fn stale_present_rebuilds_once_and_still_advances() {
    for script in [Scripted::OutOfDate, Scripted::Suboptimal] {
        let drawable = FixedDrawable::new(800, 600);
        let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

        probe.script_present(script);
        assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 0);

        assert_eq!(renderer.swapchain().rebuild_count(), 1, "{script:?}");
        assert_eq!(renderer.current_frame(), FrameSlot::new(1));
        assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 1);
        assert_eq!(renderer.swapchain().rebuild_count(), 1);
        assert!(probe.violations().is_empty(), "{:?}", probe.violations());
    }
}

#[test]
fn resize_request_rebuilds_at_the_new_extent() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    renderer.tick(&drawable).unwrap();
    drawable.resize(1024, 768);
    renderer.request_resize();
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 1);

    assert_eq!(renderer.swapchain().rebuild_count(), 1);
    let extent = renderer.swapchain().current().unwrap().extent();
    assert_eq!(extent, vk::Extent2D { width: 1024, height: 768 });

    // The flag is consumed
    renderer.tick(&drawable).unwrap();
    assert_eq!(renderer.swapchain().rebuild_count(), 1);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn minimized_window_submits_nothing_until_restored() {
    let drawable = FixedDrawable::new(0, 0);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Minimized);
    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Minimized);
    assert!(probe.submissions().is_empty());
    assert_eq!(probe.live().swapchains, 0);
    assert_eq!(renderer.current_frame(), FrameSlot::new(0));

    drawable.resize(640, 480);
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 0);

    // Minimize mid-run: the pending resize defers, later ticks idle
    drawable.resize(0, 0);
    renderer.request_resize();
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 1);
    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Minimized);
    let submitted = probe.submissions().len();
    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Minimized);
    assert_eq!(probe.submissions().len(), submitted);

    drawable.resize(640, 480);
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 0);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn unrecognized_acquire_error_is_fatal() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    renderer.tick(&drawable).unwrap();
    probe.script_acquire(Scripted::Fail(vk::Result::ERROR_DEVICE_LOST));
    let err = renderer.tick(&drawable).unwrap_err();

    assert_eq!(err.stage, FrameStage::AcquireImage);
    assert_eq!(err.slot, 1);
    assert!(matches!(
        err.source,
        GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)
    ));
    // Nothing from the failed tick reached the queue
    assert_eq!(probe.submissions().len(), 2);
}

#[test]
fn unrecognized_present_error_is_fatal() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    probe.script_present(Scripted::Fail(vk::Result::ERROR_SURFACE_LOST_KHR));
    let err = renderer.tick(&drawable).unwrap_err();

    assert_eq!(err.stage, FrameStage::Present);
    assert_eq!(err.slot, 0);
    assert!(err.to_string().contains("present"));
    assert_eq!(renderer.current_frame(), FrameSlot::new(0));
}

#[test]
fn graphics_waits_for_compute_and_acquisition() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    renderer.tick(&drawable).unwrap();
    renderer.tick(&drawable).unwrap();

    let submissions = probe.submissions();
    assert_eq!(submissions.len(), 4);
    for (tick, pair) in submissions.chunks(2).enumerate() {
        let sync = renderer.frame_sync(FrameSlot::new(tick));
        let (compute, graphics) = (&pair[0], &pair[1]);

        assert_eq!(compute.queue, QueueKind::Compute);
        assert!(compute.wait.is_empty());
        assert_eq!(compute.signal, vec![sync.compute_finished]);
        assert_eq!(compute.fence, sync.compute_in_flight);

        assert_eq!(graphics.queue, QueueKind::Graphics);
        assert_eq!(
            graphics.wait,
            vec![
                (sync.compute_finished, vk::PipelineStageFlags::VERTEX_INPUT),
                (sync.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT),
            ]
        );
        assert_eq!(graphics.signal, vec![sync.render_finished]);
        assert_eq!(graphics.fence, sync.render_in_flight);

        // Draw reads the buffer this slot's compute wrote
        match graphics.work {
            RecordedWork::Graphics(pass) => {
                assert_eq!(pass.vertex_buffer, renderer.store().buffer(FrameSlot::new(tick)));
                assert_eq!(pass.vertex_count, 256);
            }
            RecordedWork::Compute(_) => panic!("compute work on the graphics submission"),
        }
    }
}

#[test]
fn measured_clock_writes_a_clamped_step() {
    let drawable = FixedDrawable::new(800, 600);
    let gpu = HeadlessGpu::new();
    let probe = gpu.probe();
    let settings = RendererSettings {
        clock: SimulationClock::measured(0.01),
        ..RendererSettings::default()
    };
    let mut renderer = ParticleRenderer::new(gpu, &seed_particles(256, 0), settings, &drawable).unwrap();

    renderer.tick(&drawable).unwrap();
    let bytes = probe.read_buffer(renderer.bindings().uniform_buffer(FrameSlot::new(0)));
    let params: ComputeParams = bytemuck::pod_read_unaligned(&bytes);
    // First measured step has no reference point
    assert_eq!(params.delta_time, 0.0);
}

#[test]
fn skipped_tick_does_not_move_the_measured_clock() {
    let drawable = FixedDrawable::new(800, 600);
    let gpu = HeadlessGpu::new();
    let probe = gpu.probe();
    let settings = RendererSettings {
        clock: SimulationClock::measured(1.0),
        ..RendererSettings::default()
    };
    let mut renderer = ParticleRenderer::new(gpu, &seed_particles(256, 0), settings, &drawable).unwrap();

    renderer.tick(&drawable).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    probe.script_acquire(Scripted::OutOfDate);
    assert_eq!(renderer.tick(&drawable).unwrap(), TickOutcome::Skipped);
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(presented_slot(renderer.tick(&drawable).unwrap()), 1);

    let bytes = probe.read_buffer(renderer.bindings().uniform_buffer(FrameSlot::new(1)));
    let params: ComputeParams = bytemuck::pod_read_unaligned(&bytes);
    assert!(
        params.delta_time >= 0.010,
        "step {} dropped the skipped interval",
        params.delta_time
    );
}

#[test]
fn failed_setup_releases_what_it_built() {
    let drawable = FixedDrawable::new(800, 600);
    let mut gpu = HeadlessGpu::new();
    let probe = gpu.probe();
    // The surface already has a swapchain, so the renderer's own creation fails
    gpu.create_swapchain(vk::Extent2D { width: 800, height: 600 }).unwrap();
    let baseline = probe.live();

    let result = ParticleRenderer::new(gpu, &seed_particles(256, 0), RendererSettings::default(), &drawable);

    assert!(matches!(result, Err(GpuError::Protocol(_))));
    assert_eq!(probe.live(), baseline);
    assert_eq!(
        baseline,
        LiveObjects {
            swapchains: 1,
            ..LiveObjects::default()
        }
    );
}

#[test]
fn empty_particle_set_fails_setup() {
    let drawable = FixedDrawable::new(800, 600);
    let result = ParticleRenderer::new(HeadlessGpu::new(), &[], RendererSettings::default(), &drawable);
    assert!(matches!(result, Err(GpuError::EmptyParticleSet)));
}

#[test]
fn teardown_releases_every_object() {
    let drawable = FixedDrawable::new(800, 600);
    let (mut renderer, probe) = setup(HeadlessGpu::new(), &seed_particles(256, 0), &drawable);

    for _ in 0..3 {
        renderer.tick(&drawable).unwrap();
    }
    drawable.resize(640, 480);
    renderer.request_resize();
    renderer.tick(&drawable).unwrap();
    assert_ne!(probe.live(), LiveObjects::default());

    drop(renderer);

    assert_eq!(probe.live(), LiveObjects::default());
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}
