
    use super::*;
    use std::io::Cursor;
    use tracelens_protocols::{ActionEvent, BoundingBox, TraceEvent};

    fn page(ts: f64, visible: &[&str]) -> TraceEvent {
        let mut snapshot = DomSnapshotEvent::new(ts, Some("button#submit"));
        snapshot.visible_elements = visible.iter().map(|s| s.to_string()).collect();
        TraceEvent::DomSnapshot(snapshot)
    }

    fn png(width: u32, height: u32, fill: [u8; 4], marked: &[(u32, u32, [u8; 4])]) -> Vec<u8> {
        let mut img = RgbaImage::from_pixel(width, height, image::Rgba(fill));
        for (x, y, rgba) in marked {
            img.put_pixel(*x, *y, image::Rgba(*rgba));
        }
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn shift(selector: &str, impact: f64, distance: f64) -> LayoutShiftEntry {
        LayoutShiftEntry {
            selector: selector.to_string(),
            impact_fraction: Some(impact),
            distance_fraction: Some(distance),
            ..Default::default()
        }
    }

    fn run(trace: &NormalizedTrace, options: &AnalysisOptions) -> AnalyzerOutput<VisualStateSection> {
        analyze(trace, options, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_pixel_diff_fraction() {
        let white = png(4, 4, [255, 255, 255, 255], &[]);
        let one_dot = png(4, 4, [255, 255, 255, 255], &[(0, 0, [0, 0, 0, 255])]);
        let faint_dot = png(4, 4, [255, 255, 255, 255], &[(1, 1, [250, 255, 255, 255])]);
        let larger = png(5, 4, [255, 255, 255, 255], &[]);

        assert_eq!(pixel_diff_fraction(&white, &white, 0).unwrap(), 0.0);
        assert_eq!(pixel_diff_fraction(&white, &one_dot, 0).unwrap(), 1.0 / 16.0);
        assert_eq!(pixel_diff_fraction(&white, &faint_dot, 0).unwrap(), 1.0 / 16.0);
        assert_eq!(pixel_diff_fraction(&white, &faint_dot, 5).unwrap(), 0.0);
        assert_eq!(pixel_diff_fraction(&white, &larger, 0).unwrap(), 1.0);
        assert!(pixel_diff_fraction(&white, b"not an image", 0).is_err());
    }

    #[test]
    fn test_layout_shift_accumulates_per_action() {
        let mut images = ScreenshotStore::new();
        images.insert("s0.png", png(4, 4, [255, 255, 255, 255], &[]));
        images.insert("s1.png", png(4, 4, [255, 255, 255, 255], &[]));
        images.insert("s2.png", png(4, 4, [255, 255, 255, 255], &[(2, 2, [0, 0, 0, 255])]));

        let mut s2 = ScreenshotEvent::new(900.0, "s2.png");
        s2.layout_shifts = vec![shift("button#submit", 0.2, 0.3)];

        let trace = NormalizedTrace::from_events(
            vec![
                TraceEvent::Screenshot(ScreenshotEvent::new(0.0, "s0.png")),
                TraceEvent::Action(ActionEvent::new("navigate", 0.0, "navigate")),
                TraceEvent::Screenshot(ScreenshotEvent::new(700.0, "s1.png")),
                TraceEvent::Action(ActionEvent::new("click", 800.0, "click")),
                TraceEvent::Screenshot(s2),
            ],
            images,
        )
        .unwrap();

        let output = run(&trace, &AnalysisOptions::default());
        assert!(output.warnings.is_empty());

        let diffs = &output.section.diffs;
        assert_eq!(diffs[0].layout_shift_delta, 0.0);
        assert_eq!(diffs[0].cumulative_layout_shift, 0.0);
        assert!(!diffs[0].changed);

        assert!((diffs[1].layout_shift_delta - 0.06).abs() < 1e-9);
        assert!((diffs[1].cumulative_layout_shift - 0.06).abs() < 1e-9);
        assert!((output.section.cumulative_layout_shift - 0.06).abs() < 1e-9);
        assert_eq!(diffs[1].before_image_ref.as_deref(), Some("s1.png"));
        assert_eq!(diffs[1].after_image_ref.as_deref(), Some("s2.png"));
        assert_eq!(diffs[1].moved_elements, vec!["button#submit"]);
        // 1 of 16 pixels differs: above the 1% default threshold.
        assert!(diffs[1].changed);
    }

    #[test]
    fn test_missing_screenshots_aggregate_into_one_warning() {
        let trace = NormalizedTrace::from_events(
            vec![
                TraceEvent::Action(ActionEvent::new("a1", 0.0, "navigate")),
                TraceEvent::Action(ActionEvent::new("a2", 100.0, "click")),
                TraceEvent::Screenshot(ScreenshotEvent::new(150.0, "gone.png")),
            ],
            ScreenshotStore::new(),
        )
        .unwrap();

        let output = run(&trace, &AnalysisOptions::default());
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("2 action(s) missing screenshots: a1, a2"));
        for diff in &output.section.diffs {
            assert!(!diff.changed);
            assert_eq!(diff.layout_shift_delta, 0.0);
            assert!(diff.diff_fraction.is_none());
        }
    }

    #[test]
    fn test_shift_without_image_bytes_is_not_counted() {
        let mut after = ScreenshotEvent::new(150.0, "after.png");
        after.layout_shifts = vec![shift("button#submit", 0.2, 0.3)];
        let trace = NormalizedTrace::from_events(
            vec![
                TraceEvent::Screenshot(ScreenshotEvent::new(50.0, "before.png")),
                TraceEvent::Action(ActionEvent::new("a1", 100.0, "click")),
                TraceEvent::Screenshot(after),
            ],
            ScreenshotStore::new(),
        )
        .unwrap();

        let output = run(&trace, &AnalysisOptions::default());
        let diff = &output.section.diffs[0];
        assert_eq!(diff.before_image_ref.as_deref(), Some("before.png"));
        assert_eq!(diff.after_image_ref.as_deref(), Some("after.png"));
        assert_eq!(diff.layout_shift_delta, 0.0);
        assert_eq!(diff.cumulative_layout_shift, 0.0);
        assert!(diff.moved_elements.is_empty());
        assert_eq!(output.section.cumulative_layout_shift, 0.0);
        assert_eq!(output.warnings, vec!["1 action(s) missing screenshots: a1"]);
    }

    #[test]
    fn test_element_visibility_around_action() {
        let trace = NormalizedTrace::from_events(
            vec![
                page(90.0, &["form#checkout", "button#submit", "div.spinner"]),
                TraceEvent::Action(ActionEvent::new("a1", 100.0, "click").with_target("button#submit")),
                page(150.0, &["form#checkout", "div.toast"]),
                TraceEvent::Action(ActionEvent::new("a2", 200.0, "click")),
            ],
            ScreenshotStore::new(),
        )
        .unwrap();

        let output = run(&trace, &AnalysisOptions::default());
        let visibility = output.section.diffs[0].element_visibility.as_ref().unwrap();
        assert_eq!(visibility.before.len(), 3);
        assert_eq!(visibility.added, vec!["div.toast"]);
        assert_eq!(visibility.removed, vec!["button#submit", "div.spinner"]);
        // Nothing captured after the last action.
        assert!(output.section.diffs[1].element_visibility.is_none());
    }

    #[test]
    fn test_diff_threshold_controls_changed() {
        let mut images = ScreenshotStore::new();
        images.insert("a.png", png(4, 4, [0, 0, 0, 255], &[]));
        images.insert("b.png", png(4, 4, [0, 0, 0, 255], &[(0, 0, [9, 9, 9, 255])]));

        let trace = NormalizedTrace::from_events(
            vec![
                TraceEvent::Screenshot(ScreenshotEvent::new(0.0, "a.png")),
                TraceEvent::Action(ActionEvent::new("a1", 10.0, "click")),
                TraceEvent::Screenshot(ScreenshotEvent::new(20.0, "b.png")),
            ],
            images,
        )
        .unwrap();

        let strict = run(&trace, &AnalysisOptions::default());
        assert!(strict.section.diffs[0].changed);

        let lenient = run(&trace, &AnalysisOptions::default().with_diff_threshold(0.1));
        assert!(!lenient.section.diffs[0].changed);
        assert_eq!(lenient.section.diffs[0].diff_fraction, Some(1.0 / 16.0));
    }

    #[test]
    fn test_layout_shift_score_from_geometry() {
        let viewport = Viewport {
            width: 100,
            height: 100,
            device_pixel_ratio: 1.0,
        };
        let entry = LayoutShiftEntry {
            selector: "#banner".to_string(),
            previous: Some(BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 50.0,
                height: 50.0,
            }),
            current: Some(BoundingBox {
                x: 0.0,
                y: 10.0,
                width: 50.0,
                height: 50.0,
            }),
            ..Default::default()
        };

        // Union 50x60 over 100x100, moved 10 of 100.
        let score = layout_shift_score(&entry, Some(&viewport)).unwrap();
        assert!((score - 0.03).abs() < 1e-9);
        assert!(layout_shift_score(&entry, None).is_none());
    }

    #[test]
    fn test_layout_shift_fractions_are_clamped() {
        let entry = shift("#hero", 1.5, -0.2);
        assert_eq!(layout_shift_score(&entry, None), Some(0.0));

        let entry = shift("#hero", 2.0, 0.5);
        assert_eq!(layout_shift_score(&entry, None), Some(0.5));
    }

    #[test]
    fn test_cumulative_shift_is_non_decreasing() {
        let mut images = ScreenshotStore::new();
        let mut events = Vec::new();
        for i in 0..5 {
            let ts = f64::from(i) * 100.0;
            let name = format!("s{}.png", i);
            images.insert(name.as_str(), png(4, 4, [255, 255, 255, 255], &[]));
            let mut shot = ScreenshotEvent::new(ts + 50.0, name);
            shot.layout_shifts = vec![shift("#x", 0.1 * f64::from(i), 0.5)];
            events.push(TraceEvent::Action(ActionEvent::new(format!("a{}", i), ts, "click")));
            events.push(TraceEvent::Screenshot(shot));
        }
        images.insert("start.png", png(4, 4, [255, 255, 255, 255], &[]));
        events.push(TraceEvent::Screenshot(ScreenshotEvent::new(0.0, "start.png")));
        let trace = NormalizedTrace::from_events(events, images).unwrap();

        let output = run(&trace, &AnalysisOptions::default());
        let values: Vec<f64> = output
            .section
            .diffs
            .iter()
            .map(|d| d.cumulative_layout_shift)
            .collect();
        assert!(values.windows(2).all(|w| w[1] >= w[0]));
        assert!(values[4] > 0.0);
    }
