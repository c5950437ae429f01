//! End-to-end conversion scenarios: classification, migration output and
//! idempotence of the deprecation converter.

use pretty_assertions::assert_eq;

use crate::compiler::convert::tables;
use crate::compiler::lang::token::TokenKind;
use crate::compiler::DeprecatedConverter;

/// Classifies, converts and checks the emitted source, mirroring how the
/// editor drives the converter.
fn test_conversion(old_code: &str, expected: &str, is_deprecated: bool) {
    let mut converter = DeprecatedConverter::new(old_code);
    assert_eq!(
        converter.is_legacy(),
        is_deprecated,
        "classification of {:?}",
        old_code
    );
    assert!(
        converter.convert(),
        "conversion of {:?} failed: {}",
        old_code,
        converter.error_text()
    );
    assert_eq!(converter.emit(), expected);
}

fn convert_twice(old_code: &str) -> (String, String) {
    let mut first = DeprecatedConverter::new(old_code);
    assert!(first.convert(), "{}", first.error_text());
    let once = first.emit();
    let mut second = DeprecatedConverter::new(once.clone());
    assert!(second.convert(), "{}", second.error_text());
    (once, second.emit())
}

#[test]
fn test_simple_conversion() {
    test_conversion(
        "shader_type particles; void vertex() { float x = 1.0; }",
        "shader_type particles; void process() { float x = 1.0; }",
        true,
    );
}

#[test]
fn test_simple_conversion_with_arrays() {
    test_conversion(
        "shader_type particles; void vertex() { float xy[2] = {1.0,1.1}; }",
        "shader_type particles; void process() { float xy[2] = {1.0,1.1}; }",
        true,
    );
}

#[test]
fn test_conversion_with_struct() {
    test_conversion(
        "shader_type particles; struct foo{float bar;} void vertex() { float xy[2] = {1.0,1.1}; }",
        "shader_type particles; struct foo{float bar;} void process() { float xy[2] = {1.0,1.1}; }",
        true,
    );
}

#[test]
fn test_new_style_array_declaration_is_current() {
    let code = "shader_type particles; void process() { float[2] xy = {1.0,1.1}; }";
    test_conversion(code, code, false);
}

#[test]
fn test_float_literal_normalization() {
    test_conversion(
        "shader_type spatial; const float x = 1f;",
        "shader_type spatial; const float x = 1.0f;",
        true,
    );
    let (once, twice) = convert_twice("shader_type spatial; const float x = 1f;");
    assert_eq!(once, twice);
}

#[test]
fn test_particles_vertex_to_process() {
    test_conversion(
        "shader_type particles; void vertex() { float x = 1.0; }",
        "shader_type particles; void process() { float x = 1.0; }",
        true,
    );
}

#[test]
fn test_process_rename_with_existing_process() {
    test_conversion(
        "shader_type particles; void vertex() {}  void process() {}",
        "shader_type particles; void process() {}  void process_() {}",
        true,
    );
}

#[test]
fn test_process_rename_with_called_process() {
    test_conversion(
        "shader_type particles; void process() {} void vertex() { process(); }",
        "shader_type particles; void process_() {} void process() { process_(); }",
        true,
    );
}

#[test]
fn test_process_rename_with_cross_calls() {
    test_conversion(
        "shader_type particles; void process() {vertex();} void vertex() {} void foo() { vertex(); }",
        "shader_type particles; void process_() {process();} void process() {} void foo() { process(); }",
        true,
    );
}

#[test]
fn test_no_function_named_vertex() {
    let code = "shader_type particles; void process() {}";
    test_conversion(code, code, false);
}

#[test]
fn test_clearcoat_left_hand_assignment() {
    test_conversion(
        "shader_type spatial; void fragment() {\nCLEARCOAT_GLOSS = 1.0;\n}\n",
        "shader_type spatial; void fragment() {\nCLEARCOAT_ROUGHNESS = (1.0 - (1.0));\n}\n",
        true,
    );
}

#[test]
fn test_clearcoat_compound_assignment() {
    test_conversion(
        "shader_type spatial; void fragment() {\nCLEARCOAT_GLOSS *= 0.5;\n}\n",
        "shader_type spatial; void fragment() {\nCLEARCOAT_ROUGHNESS = (1.0 - ((1.0 - CLEARCOAT_ROUGHNESS) * 0.5));\n}\n",
        true,
    );
}

#[test]
fn test_clearcoat_right_hand_usage() {
    test_conversion(
        "shader_type spatial; void fragment() {\nfloat foo = CLEARCOAT_GLOSS;\n}\n",
        "shader_type spatial; void fragment() {\nfloat foo = (1.0 - CLEARCOAT_ROUGHNESS);\n}\n",
        true,
    );
}

#[test]
fn test_clearcoat_write_that_is_read() {
    test_conversion(
        "shader_type spatial; void fragment() {\nfloat foo = (CLEARCOAT_GLOSS *= 0.5);\n}\n",
        "shader_type spatial; void fragment() {\nfloat foo = ((1.0 - (CLEARCOAT_ROUGHNESS = (1.0 - ((1.0 - CLEARCOAT_ROUGHNESS) * 0.5)))));\n}\n",
        true,
    );
}

#[test]
fn test_clearcoat_conversion_is_idempotent() {
    let (once, twice) =
        convert_twice("shader_type spatial; void fragment() {\nCLEARCOAT_GLOSS *= 0.5;\n}\n");
    assert_eq!(once, twice);
}

#[test]
fn test_index_wrapped_in_int() {
    test_conversion(
        "shader_type particles; void vertex() {\nfloat foo = INDEX/2;\n}\n",
        "shader_type particles; void process() {\nfloat foo = int(INDEX)/2;\n}\n",
        true,
    );
}

#[test]
fn test_index_wrap_does_not_clobber_existing_casts() {
    test_conversion(
        "shader_type particles; void vertex() {\nfloat foo = int(INDEX/2) * int(INDEX) * 2 * float(INDEX);\n}\n",
        "shader_type particles; void process() {\nfloat foo = int(int(INDEX)/2) * int(INDEX) * 2 * float(INDEX);\n}\n",
        true,
    );
}

#[test]
fn test_index_wrap_is_idempotent() {
    let (once, twice) =
        convert_twice("shader_type particles; void vertex() {\nfloat foo = INDEX/2;\n}\n");
    assert_eq!(once, twice);
}

#[test]
fn test_all_hint_renames() {
    for renamed in tables::RENAMED_HINTS {
        let code = format!(
            "shader_type spatial; uniform sampler2D foo : {};",
            renamed.name
        );
        let expected = format!(
            "shader_type spatial; uniform sampler2D foo : {};",
            renamed.replacement.spelling()
        );
        test_conversion(&code, &expected, true);
    }
}

#[test]
fn test_all_builtin_renames() {
    for renamed in tables::RENAMED_BUILTINS {
        if renamed.special_handling {
            continue;
        }
        for (mode, functions) in renamed.mode_functions {
            for function in *functions {
                let code = format!(
                    "shader_type {}; void {}() {{ {}; }}",
                    mode.name(),
                    function,
                    renamed.name
                );
                let expected = format!(
                    "shader_type {}; void {}() {{ {}; }}",
                    mode.name(),
                    function,
                    renamed.replacement
                );
                test_conversion(&code, &expected, true);
            }
        }
    }
}

#[test]
fn test_no_renames_in_non_candidate_functions() {
    // CAMERA_MATRIX is spatial-only; in canvas_item nothing changes.
    let code = "shader_type canvas_item; void fragment() { float CAMERA_MATRIX = 1.0; CAMERA_MATRIX += 1.0; }";
    test_conversion(code, code, false);
    // TRANSMISSION is valid in fragment and light but not vertex.
    let code = "shader_type spatial; void vertex() { float TRANSMISSION = 1.0; TRANSMISSION += 1.0; }";
    test_conversion(code, code, false);
}

#[test]
fn test_no_renames_when_builtin_is_declared() {
    for renamed in tables::RENAMED_BUILTINS {
        if renamed.special_handling {
            continue;
        }
        for (mode, functions) in renamed.mode_functions {
            for function in *functions {
                let code = format!(
                    "shader_type {}; void {}() {{ float {} = 1.0; {} += 1.0; }}",
                    mode.name(),
                    function,
                    renamed.name,
                    renamed.name
                );
                // Declaring the name makes this current-dialect code.
                test_conversion(&code, &code, false);
            }
        }
    }
}

#[test]
fn test_uniform_insertion_for_removed_builtins() {
    for removed in tables::REMOVED_BUILTINS {
        let hint_string = removed
            .hints
            .iter()
            .map(|h| h.spelling())
            .collect::<Vec<_>>()
            .join(", ");
        for (mode, functions) in removed.mode_functions {
            for function in *functions {
                let code = format!(
                    "shader_type {}; void {}() {{ {}; }}",
                    mode.name(),
                    function,
                    removed.name
                );
                if removed.uniform_type == TokenKind::Error {
                    let mut converter = DeprecatedConverter::new(code.clone());
                    assert!(converter.is_legacy());
                    assert!(!converter.convert());
                    converter.set_fail_on_unported(false);
                    assert!(converter.convert(), "{}", converter.error_text());
                    continue;
                }
                let expected = format!(
                    "shader_type {};\nuniform {} {} : {};\n void {}() {{ {}; }}",
                    mode.name(),
                    removed.uniform_type.spelling(),
                    removed.name,
                    hint_string,
                    function,
                    removed.name
                );
                test_conversion(&code, &expected, true);
            }
        }
    }
}

#[test]
fn test_uniform_insertion_is_idempotent() {
    let (once, twice) = convert_twice(
        "shader_type spatial; void fragment() { vec4 c = texture(SCREEN_TEXTURE, SCREEN_UV); }",
    );
    assert_eq!(once, twice);
    assert_eq!(once.matches("uniform sampler2D SCREEN_TEXTURE").count(), 1);
}

#[test]
fn test_reserved_keyword_renames() {
    let keywords: Vec<TokenKind> = TokenKind::ALL
        .iter()
        .copied()
        .filter(|kind| tables::is_new_reserved_keyword(*kind))
        .collect();
    assert!(keywords.contains(&TokenKind::Global));
    assert!(keywords.contains(&TokenKind::HintSourceColor));

    let render = |name: &str| -> Vec<String> {
        vec![
            format!("shader_type spatial;\nvoid {}() {{}}\n", name),
            format!("shader_type spatial;\nvoid test_func() {{float {};}}\n", name),
            format!("shader_type spatial;\nuniform sampler2D {};\n", name),
            format!("shader_type spatial;\nconst float {} = 1.0;\n", name),
            format!("shader_type spatial;\nvarying float {};\n", name),
        ]
    };
    for keyword in keywords {
        let spelling = keyword.spelling();
        let renamed = format!("{}_", spelling);
        for (code, expected) in render(spelling).into_iter().zip(render(&renamed)) {
            test_conversion(&code, &expected, true);
        }
    }
}

#[test]
fn test_removed_types() {
    for removed_type in tables::REMOVED_TYPES {
        let sources = [
            format!("shader_type spatial;\n{} foo() {{}}\n", removed_type),
            format!(
                "shader_type spatial;\nvoid test_func() {{{} foo;}}\n",
                removed_type
            ),
            format!("shader_type spatial;\nvarying {} foo;\n", removed_type),
        ];
        for code in sources {
            let mut converter = DeprecatedConverter::new(code.clone());
            assert!(converter.is_legacy(), "{:?}", code);
            assert!(!converter.convert());
            converter.set_fail_on_unported(false);
            assert!(converter.convert(), "{}", converter.error_text());
            assert!(converter.emit().contains("/* !convert: "));
        }
    }
}

#[test]
fn test_renamed_render_mode() {
    test_conversion(
        "shader_type spatial;\nrender_mode depth_draw_alpha_prepass;\nvoid fragment() {}\n",
        "shader_type spatial;\nrender_mode depth_prepass_alpha;\nvoid fragment() {}\n",
        true,
    );
}

#[test]
fn test_removed_render_mode_elision() {
    // Leading entry: the identifier and its trailing comma go; both
    // surrounding spaces survive.
    test_conversion(
        "shader_type spatial;\nrender_mode async_visible, cull_back;\nvoid fragment() {}\n",
        "shader_type spatial;\nrender_mode  cull_back;\nvoid fragment() {}\n",
        true,
    );
    // Trailing entry: the leading comma goes with it.
    test_conversion(
        "shader_type spatial;\nrender_mode cull_back, async_hidden;\nvoid fragment() {}\n",
        "shader_type spatial;\nrender_mode cull_back;\nvoid fragment() {}\n",
        true,
    );
    // Sole entry removes the whole directive, leaving its line ending.
    test_conversion(
        "shader_type spatial;\nrender_mode async_visible;\nvoid fragment() {}\n",
        "shader_type spatial;\n\nvoid fragment() {}\n",
        true,
    );
}

#[test]
fn test_unported_render_mode() {
    let code = "shader_type spatial;\nrender_mode specular_blinn;\nvoid fragment() {}\n";
    let mut converter = DeprecatedConverter::new(code);
    assert!(converter.is_legacy());
    assert!(!converter.convert());
    assert!(converter.error_text().contains("specular_blinn"));
    converter.set_fail_on_unported(false);
    assert!(converter.convert(), "{}", converter.error_text());
    let emitted = converter.emit();
    assert!(emitted.contains("/* !convert: "));
    assert!(emitted.contains("specular_blinn"));
}

#[test]
fn test_builtin_function_name_collision_warns() {
    let code = "shader_type spatial;\nfloat fma(float a) { return a; }\nvoid fragment() {}\n";
    let mut converter = DeprecatedConverter::new(code);
    assert!(converter.convert(), "{}", converter.error_text());
    let emitted = converter.emit();
    assert!(emitted.contains("/* !convert: WARNING: Function 'fma' is a built-in function"));
    // The definition itself is left alone.
    assert!(emitted.contains("float fma(float a)"));
}

#[test]
fn test_classification_never_errors_on_garbage() {
    for source in [
        "",
        ";;;",
        "shader_type",
        "shader_type spatial",
        "shader_type spatial; uniform ;",
        "shader_type spatial; void f( {",
    ] {
        let mut converter = DeprecatedConverter::new(source);
        assert!(!converter.is_legacy(), "{:?}", source);
    }
}

#[test]
fn test_conversion_failure_reports_line() {
    let code = "shader_type spatial;\nvoid fragment() {\nfloat x = MODULATE;\n}\n";
    // MODULATE is canvas_item-only; in spatial nothing happens.
    let mut converter = DeprecatedConverter::new(code);
    assert!(converter.convert());

    let code = "shader_type canvas_item;\nvoid fragment() {\nfloat x = MODULATE;\n}\n";
    let mut converter = DeprecatedConverter::new(code);
    assert!(!converter.convert());
    assert_eq!(converter.error_line(), 3);
    assert!(converter.error_text().contains("MODULATE"));
}

#[test]
fn test_round_trip_output_parses_as_current_dialect() {
    use crate::compiler::lang::parse::{self, CompileInfo};
    use crate::compiler::lang::{lex, ShaderMode};

    let curated = [
        "shader_type particles; void vertex() { float x = 1.0; }",
        "shader_type particles; void vertex() {}  void process() {}",
        "shader_type spatial; void fragment() { CLEARCOAT_GLOSS = 1.0; }",
        "shader_type spatial; void fragment() { CLEARCOAT_GLOSS *= 0.5; }",
        "shader_type particles; void vertex() { float foo = INDEX/2; }",
        "shader_type spatial; const float x = 1f;",
        "shader_type spatial; void fragment() { vec4 c = texture(SCREEN_TEXTURE, SCREEN_UV); }",
        "shader_type spatial; uniform sampler2D tex : hint_albedo;\nvoid fragment() { ALBEDO = texture(tex, UV).rgb; }",
    ];
    for source in curated {
        let mut converter = DeprecatedConverter::new(source);
        assert!(converter.convert(), "{}", converter.error_text());
        let migrated = converter.emit();
        let mode = ShaderMode::from_name(&lex::get_shader_type(&migrated).unwrap()).unwrap();
        parse::parse(&migrated, &CompileInfo::new(mode))
            .unwrap_or_else(|e| panic!("migrated source no longer parses: {} in {:?}", e, migrated));
    }
}

#[test]
fn test_determinism() {
    let code = "shader_type particles; void vertex() { float foo = INDEX/2; }  void process() {}";
    let mut first = DeprecatedConverter::new(code);
    assert!(first.convert());
    let mut second = DeprecatedConverter::new(code);
    assert!(second.convert());
    assert_eq!(first.emit(), second.emit());
}
