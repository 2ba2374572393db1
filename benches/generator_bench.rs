use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use emg::config::GenerationConfig;
use emg::pipeline::{run_generation, GenerationRequest};
use emg::signature::Signature;

// Benchmark scenarios over a synthetic USB-style module.
// All scenarios generate successfully with the default configuration.

const CATEGORIES: &str = r#"{
    "categories": {
        "usb": {
            "containers": {
                "driver": {
                    "signature": "struct usb_driver",
                    "fields": {"probe": "probe", "disconnect": "disconnect"}
                }
            },
            "resources": {
                "interface": {"signature": "struct usb_interface *"}
            },
            "callbacks": {
                "probe": {"signature": "int (*probe)(%usb.interface%)"},
                "disconnect": {"signature": "void (*disconnect)(%usb.interface%)"}
            }
        }
    },
    "kernel functions": {
        "usb_register_driver": {
            "signature": "int usb_register_driver(%usb.driver%)",
            "header": "linux/usb.h"
        }
    }
}"#;

const ENVIRONMENT: &str = r#"{
    "environment processes": {
        "scenario": {
            "labels": {
                "container": {"container": true},
                "resource": {"resource": true, "parameter": true}
            },
            "process": "(!register).{cycle}",
            "subprocesses": {
                "cycle": {"process": "[probe].([disconnect].{cycle} | (deregister))"}
            },
            "actions": {
                "register": {"parameters": ["%container%"]},
                "deregister": {"parameters": ["%container%"]},
                "probe": {"callback": "%container%.probe", "parameters": ["%resource%"]},
                "disconnect": {"callback": "%container%.disconnect", "parameters": ["%resource%"]}
            }
        }
    },
    "functions models": {
        "usb_register_driver": {
            "labels": {"arg": {"container": true, "parameter": true}},
            "process": "[register].[deregister]",
            "actions": {
                "register": {"parameters": ["%arg%"]},
                "deregister": {"parameters": ["%arg%"]}
            }
        }
    }
}"#;

/// Facts generator used for the instance-scaling scenario: `n_drivers`
/// independent driver structures, each with its own callback pair.
fn generate_facts(n_drivers: usize) -> String {
    let mut functions = vec![String::from(
        r#""mod_exit": {"signature": "void mod_exit(void)", "files": ["mod.c"]}"#,
    )];
    let mut globals = Vec::new();
    for d in 0..n_drivers {
        functions.push(format!(
            r#""probe_{d}": {{"signature": "int probe_{d}(struct usb_interface *)", "files": ["mod.c"]}}"#
        ));
        functions.push(format!(
            r#""disconnect_{d}": {{"signature": "void disconnect_{d}(struct usb_interface *)", "files": ["mod.c"]}}"#
        ));
        globals.push(format!(
            r#"{{"name": "driver_{d}", "file": "mod.c", "signature": "struct usb_driver",
                "fields": {{"probe": "&probe_{d}", "disconnect": "&disconnect_{d}"}}}}"#
        ));
    }
    let calls = (0..n_drivers)
        .map(|d| format!(r#"["&driver_{d}"]"#))
        .collect::<Vec<_>>()
        .join(", ");
    functions.push(format!(
        r#""mod_init": {{"signature": "int mod_init(void)", "files": ["mod.c"], "calls": {{"usb_register_driver": [{calls}]}}}}"#
    ));
    format!(
        r#"{{
            "functions": {{{}}},
            "global variable initializations": [{}],
            "init": {{"mod.c": "mod_init"}},
            "exit": {{"mod.c": "mod_exit"}}
        }}"#,
        functions.join(", "),
        globals.join(", "),
    )
}

fn bench_full_generation(c: &mut Criterion) {
    let facts = generate_facts(1);
    c.bench_function("generation/full", |b| {
        b.iter(|| {
            let request = GenerationRequest {
                categories: black_box(CATEGORIES),
                environment: black_box(ENVIRONMENT),
                facts: black_box(&facts),
                config: GenerationConfig::default(),
            };
            run_generation(&request).expect("benchmark scenario must generate")
        })
    });
}

fn bench_instance_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation/scaling");
    for n_drivers in [1usize, 4, 16, 64] {
        let facts = generate_facts(n_drivers);
        group.bench_with_input(
            BenchmarkId::from_parameter(n_drivers),
            &facts,
            |b, facts| {
                b.iter(|| {
                    let request = GenerationRequest {
                        categories: black_box(CATEGORIES),
                        environment: black_box(ENVIRONMENT),
                        facts: black_box(facts),
                        config: GenerationConfig::default(),
                    };
                    run_generation(&request).expect("benchmark scenario must generate")
                })
            },
        );
    }
    group.finish();
}

fn bench_signature_parsing(c: &mut Criterion) {
    let declarations = [
        "int",
        "struct usb_interface *",
        "int (*probe)(struct usb_interface *, void *)",
        "void (*complete)(struct request *, int)",
        "int usb_register_driver(struct usb_driver *)",
    ];
    c.bench_function("signature/parse", |b| {
        b.iter(|| {
            for decl in &declarations {
                black_box(Signature::parse(black_box(decl)).expect("must parse"));
            }
        })
    });
}

fn bench_process_parsing(c: &mut Criterion) {
    let expression = "(!register).([probe[2]].(<ok> | <fail>).[@disconnect].{cycle} | (deregister))";
    c.bench_function("calculus/parse", |b| {
        b.iter(|| black_box(emg::calculus::parse_expression("bench", black_box(expression))))
    });
}

criterion_group!(
    benches,
    bench_full_generation,
    bench_instance_scaling,
    bench_signature_parsing,
    bench_process_parsing
);
criterion_main!(benches);
