//! End-to-end request scenarios through `RequestPipeline`

mod common;

use bgremove_worker::{
    Category, Channels, CropMargin, FailureKind, MarginValue, MockExtractor, MockMode, Position,
    RemovalRequest, RemovalResponse, RequestedFormat, ResponseStatus, SmartAlphaImage,
};
use common::{decode_alpha, icc_profile, key_pipeline, pipeline, png, scene};
use std::io::{Cursor, Read};

fn alpha_request(data: Vec<u8>) -> RemovalRequest {
    RemovalRequest {
        channels: Channels::Alpha,
        format: RequestedFormat::Png,
        category: Some(Category::Product),
        ..RemovalRequest::new(data)
    }
}

#[test]
fn test_full_frame_roi_keeps_edge_foreground() {
    // Subject touches the left edge; the far ROI corner equals the image size
    let bytes = png(&scene(639, 358, (0, 100, 200, 160)));
    let request = RemovalRequest {
        roi: Some([0, 0, 639, 358]),
        ..alpha_request(bytes)
    };

    let response = key_pipeline().process(&request).unwrap();
    assert_eq!(response.status, ResponseStatus::Ok);
    assert_eq!(response.format.as_deref(), Some("png"));
    assert_eq!((response.width, response.height), (Some(639), Some(358)));

    let alpha = decode_alpha(response.data.as_deref().unwrap());
    assert_eq!(alpha.dimensions(), (639, 358));
    assert!((100..260).all(|y| alpha.get_pixel(0, y).0[0] > 0));
    assert_eq!(alpha.get_pixel(638, 0).0[0], 0);
    assert_eq!(response.input_foreground().map(|r| (r.x, r.width)), Some((0, 200)));
}

#[test]
fn test_cmyk_zip_bundle_keeps_colorspace_and_profile() {
    let icc = icc_profile(b"CMYK");
    let request = RemovalRequest {
        format: RequestedFormat::Zip,
        category: Some(Category::Product),
        ..RemovalRequest::new(common::cmyk_jpeg(96, 64, &icc))
    };

    let mut pipeline = pipeline(MockExtractor::new(MockMode::ConstantAlpha(200)));
    let response = pipeline.process(&request).unwrap();
    assert_eq!(response.format.as_deref(), Some("zip"));

    let mut archive = zip::ZipArchive::new(Cursor::new(response.data.unwrap())).unwrap();
    let mut entry = |name: &str| {
        let mut bytes = Vec::new();
        archive.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
        bytes
    };
    let color = entry("color.jpg");
    let alpha = entry("alpha.png");

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(&color));
    decoder.decode().unwrap();
    assert_eq!(decoder.info().unwrap().pixel_format, jpeg_decoder::PixelFormat::CMYK32);
    assert_eq!(decoder.icc_profile(), Some(icc));

    let matte = image::load_from_memory(&alpha).unwrap();
    assert_eq!(matte.color(), image::ColorType::L8);
    assert!(!alpha.windows(4).any(|w| w == b"iCCP"));
    assert!(matte.to_luma8().pixels().all(|p| p.0[0] == 200));
}

#[test]
fn test_blank_image_has_unknown_foreground() {
    let white = image::RgbImage::from_pixel(300, 200, image::Rgb([255, 255, 255]));
    let mut pipeline = key_pipeline();
    let err = pipeline
        .process(&RemovalRequest::new(common::jpeg(&white)))
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::UnknownForeground);
    assert!(!err.trips_breaker());

    let response = RemovalResponse::from_error(&err, pipeline.api());
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.description, "unknown_foreground");
    assert!(response.data.is_none());
}

#[test]
fn test_truncated_jpeg_cannot_be_read() {
    let mut bytes = common::jpeg(&scene(120, 80, (30, 20, 40, 30)));
    bytes.truncate(100);

    let mock = MockExtractor::new(MockMode::BackgroundKey);
    let err = pipeline(mock.clone())
        .process(&RemovalRequest::new(bytes))
        .unwrap_err();
    assert_eq!(err.kind().description(), "failed_to_read_image");
    assert!(mock.call_history().is_empty());
}

#[test]
fn test_jpeg_cut_inside_the_scan_cannot_be_read() {
    let noisy = image::RgbImage::from_fn(320, 240, |x, y| {
        let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) >> 7;
        image::Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    });
    let mut bytes = common::jpeg(&noisy);
    bytes.truncate(bytes.len() * 6 / 10);

    let mock = MockExtractor::new(MockMode::BackgroundKey);
    let err = pipeline(mock.clone())
        .process(&RemovalRequest::new(bytes))
        .unwrap_err();
    assert_eq!(err.kind().description(), "failed_to_read_image");
    assert!(mock.call_history().is_empty());
}

#[test]
fn test_signal_beacon_survives_decode() {
    let mut marked = scene(64, 48, (20, 10, 20, 20));
    marked.put_pixel(0, 0, image::Rgb([255, 0, 0]));
    assert!(SmartAlphaImage::decode(&png(&marked), Some(0.25)).unwrap().signal_beacon());

    let plain = png(&scene(64, 48, (20, 10, 20, 20)));
    assert!(!SmartAlphaImage::decode(&plain, Some(0.25)).unwrap().signal_beacon());

    // Requests carrying the beacon are processed like any other
    let mut opaque = pipeline(MockExtractor::new(MockMode::ConstantAlpha(255)));
    let response = opaque.process(&alpha_request(png(&marked))).unwrap();
    assert!(response.is_ok());
}

#[test]
fn test_crop_margin_adds_transparent_border() {
    let bytes = png(&scene(300, 200, (100, 60, 80, 50)));

    let reference = key_pipeline()
        .process(&RemovalRequest {
            crop: true,
            ..alpha_request(bytes.clone())
        })
        .unwrap();
    assert_eq!((reference.width, reference.height), (Some(80), Some(50)));

    let response = key_pipeline()
        .process(&RemovalRequest {
            crop: true,
            crop_margin: CropMargin::uniform(MarginValue::pixels(50.0)),
            ..alpha_request(bytes)
        })
        .unwrap();
    assert_eq!((response.width, response.height), (Some(180), Some(150)));

    let alpha = decode_alpha(response.data.as_deref().unwrap());
    for (x, y, px) in alpha.enumerate_pixels() {
        let inside = (50..130).contains(&x) && (50..100).contains(&y);
        if inside {
            assert_eq!(px.0[0], 255, "subject pixel {x},{y}");
        } else {
            assert_eq!(px.0[0], 0, "border pixel {x},{y}");
        }
    }
}

#[test]
fn test_auto_category_uses_the_identifier() {
    let mock = MockExtractor::new(MockMode::BackgroundKey).with_category(Category::Animal);
    let request = RemovalRequest::new(png(&scene(200, 150, (50, 40, 60, 50))));
    let response = pipeline(mock.clone()).process(&request).unwrap();

    assert_eq!(response.foreground_type, Some(Category::Animal));
    let calls = mock.call_history();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].starts_with("identify:200x150"));
    assert!(calls[1].contains(":animal:color=true"));
}

#[test]
fn test_scale_and_position_keep_the_canvas() {
    let request = RemovalRequest {
        scale: Some(50.0),
        position: Some(Position { x: 0.0, y: 0.0 }),
        ..alpha_request(png(&scene(200, 100, (80, 30, 40, 40))))
    };
    let response = key_pipeline().process(&request).unwrap();
    assert_eq!((response.width, response.height), (Some(200), Some(100)));

    let alpha = decode_alpha(response.data.as_deref().unwrap());
    // Flush top-left after positioning
    assert!(alpha.get_pixel(1, 1).0[0] > 0);
    assert_eq!(alpha.get_pixel(199, 99).0[0], 0);
}

#[test]
fn test_background_image_is_underlaid() {
    let backdrop = image::RgbImage::from_pixel(50, 50, image::Rgb([0, 0, 250]));
    let request = RemovalRequest {
        bg_image: Some(png(&backdrop)),
        format: RequestedFormat::Png,
        category: Some(Category::Product),
        ..RemovalRequest::new(png(&scene(120, 90, (40, 30, 40, 30))))
    };
    let response = key_pipeline().process(&request).unwrap();
    let out = image::load_from_memory(response.data.as_deref().unwrap())
        .unwrap()
        .to_rgba8();
    let [r, g, b, a] = out.get_pixel(2, 2).0;
    assert!(r < 8 && g < 8 && b > 240, "backdrop pixel {:?}", [r, g, b]);
    assert_eq!(a, 255);
    assert_eq!(out.get_pixel(60, 45).0, [180, 30, 40, 255]);
}

#[test]
fn test_derived_sizes_use_the_pre_limit_dimensions() {
    let request = RemovalRequest {
        megapixels: 0.01,
        ..alpha_request(png(&scene(400, 300, (100, 100, 200, 100))))
    };
    let response = key_pipeline().process(&request).unwrap();
    assert!(response.width.unwrap() * response.height.unwrap() <= 10_000);
    assert_eq!(response.maxwidth, Some(400));
    assert_eq!(response.maxheight, Some(300));
}
